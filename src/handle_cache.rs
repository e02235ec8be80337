//! UUID → ATT handle index, built once per connection.

use std::collections::{BTreeMap, HashMap};

use log::debug;
use uuid::Uuid;

use crate::error::{MetaWearError, Result};
use crate::transport::TransportAdapter;
use crate::types::CharacteristicHandle;

/// Immutable after construction, so the owner task and the notification task
/// read it without locking.
#[derive(Debug, Clone, Default)]
pub struct HandleCache {
    by_uuid: HashMap<Uuid, CharacteristicHandle>,
    by_value_handle: HashMap<u16, Uuid>,
}

impl HandleCache {
    pub fn new(characteristics: BTreeMap<Uuid, CharacteristicHandle>) -> Self {
        let by_value_handle = characteristics
            .iter()
            .map(|(uuid, h)| (h.value_handle, *uuid))
            .collect();
        Self {
            by_uuid: characteristics.into_iter().collect(),
            by_value_handle,
        }
    }

    /// Enumerate the peripheral's GATT table through `transport` and index it.
    pub async fn build(transport: &dyn TransportAdapter) -> Result<Self> {
        let characteristics = transport.discover_characteristics().await?;
        debug!("handle cache: {} characteristic(s)", characteristics.len());
        Ok(Self::new(characteristics))
    }

    /// Value handle (or, with `notify_handle`, the CCCD handle) of `uuid`.
    ///
    /// An absent UUID is a hard [`MetaWearError::UnknownCharacteristic`].
    pub fn lookup(&self, uuid: Uuid, notify_handle: bool) -> Result<u16> {
        let h = self.get(uuid)?;
        Ok(if notify_handle {
            h.notify_handle
        } else {
            h.value_handle
        })
    }

    pub fn get(&self, uuid: Uuid) -> Result<CharacteristicHandle> {
        self.by_uuid
            .get(&uuid)
            .copied()
            .ok_or(MetaWearError::UnknownCharacteristic(uuid))
    }

    pub fn contains(&self, uuid: Uuid) -> bool {
        self.by_uuid.contains_key(&uuid)
    }

    /// Reverse lookup from a value handle.
    pub fn uuid_for_handle(&self, value_handle: u16) -> Option<Uuid> {
        self.by_value_handle.get(&value_handle).copied()
    }

    pub fn len(&self) -> usize {
        self.by_uuid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_uuid.is_empty()
    }
}
