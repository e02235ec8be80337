fn main() {
    // ── macOS: embed Info.plist so CoreBluetooth lets the scanner run ────────
    //
    // CBCentralManager stays "unauthorised" for a bare CLI binary unless an
    // Info.plist with NSBluetoothAlwaysUsageDescription is linked into the
    // __TEXT,__info_plist section.  CARGO_CFG_TARGET_OS is the target, not
    // the host, so cross builds pick this up too.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("macos") {
        return;
    }
    let Ok(dir) = std::env::var("CARGO_MANIFEST_DIR") else {
        return;
    };
    let plist = format!("{dir}/Info.plist");

    // ld … -sectcreate __TEXT __info_plist /path/to/Info.plist …
    for arg in ["-sectcreate", "__TEXT", "__info_plist", plist.as_str()] {
        println!("cargo:rustc-link-arg-bins={arg}");
    }
    println!("cargo:rerun-if-changed=Info.plist");
}
