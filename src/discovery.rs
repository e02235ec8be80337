//! Scan for nearby BLE peripherals and pick out MetaWear boards.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::Result;
use crate::types::PeripheralAddress;

/// Scan for `timeout` and return every peripheral seen, deduplicated by
/// address and sorted by it.
///
/// With `name_filter`, only peripherals whose advertised name contains it
/// (case-insensitively) are kept; pass
/// [`crate::protocol::METAWEAR_NAME_FILTER`] to keep MetaWear boards only.
/// Finding nothing is not an error.
///
/// Fails with [`crate::error::MetaWearError::Permission`] when the OS denies
/// scanning and [`crate::error::MetaWearError::Transport`] on adapter I/O
/// failure.  Neither is retried.
///
/// ```no_run
/// # use std::time::Duration;
/// # use metawear_rs::discovery::discover_devices;
/// # use metawear_rs::protocol::METAWEAR_NAME_FILTER;
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// for device in discover_devices(Duration::from_secs(5), Some(METAWEAR_NAME_FILTER)).await? {
///     println!("{}  {}", device.address, device.name);
/// }
/// # Ok(())
/// # }
/// ```
#[cfg(feature = "btleplug")]
pub async fn discover_devices(
    timeout: Duration,
    name_filter: Option<&str>,
) -> Result<Vec<PeripheralAddress>> {
    use btleplug::api::{Central, Peripheral as _, ScanFilter};
    use log::{debug, info};

    use crate::transport::btleplug_backend::{default_adapter, peripheral_address};

    let adapter = default_adapter().await?;

    info!("scanning for {} s…", timeout.as_secs_f32());
    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(timeout).await;
    adapter.stop_scan().await.ok();

    let mut seen = Vec::new();
    for p in adapter.peripherals().await? {
        let name = match p.properties().await {
            Ok(Some(props)) => props.local_name.unwrap_or_default(),
            Ok(None) => String::new(),
            Err(e) => {
                debug!("skipping peripheral without properties: {e}");
                continue;
            }
        };
        seen.push(PeripheralAddress::new(peripheral_address(&p), name));
    }

    let found = filter_devices(seen, name_filter);
    info!("{} device(s) found", found.len());
    Ok(found)
}

#[cfg(not(feature = "btleplug"))]
pub async fn discover_devices(
    _timeout: Duration,
    _name_filter: Option<&str>,
) -> Result<Vec<PeripheralAddress>> {
    Err(crate::error::MetaWearError::NotAvailable(
        "device discovery (enable the `btleplug` feature)",
    ))
}

/// Deduplicate by address and apply the case-insensitive name filter.
///
/// When the same address shows up more than once, the first non-empty name
/// wins.  Output is sorted by address.
pub fn filter_devices(
    devices: impl IntoIterator<Item = PeripheralAddress>,
    name_filter: Option<&str>,
) -> Vec<PeripheralAddress> {
    let mut by_address: BTreeMap<String, String> = BTreeMap::new();
    for device in devices {
        let name = by_address.entry(device.address).or_default();
        if name.is_empty() {
            *name = device.name;
        }
    }

    let needle = name_filter.map(str::to_lowercase);
    by_address
        .into_iter()
        .filter(|(_, name)| match &needle {
            Some(needle) => name.to_lowercase().contains(needle.as_str()),
            None => true,
        })
        .map(|(address, name)| PeripheralAddress { address, name })
        .collect()
}
