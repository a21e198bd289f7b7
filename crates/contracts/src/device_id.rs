//! DeviceId - shared identifier of a reporting device
//!
//! Every reading from the same device carries the same id, so it is backed by
//! `Arc<str>` and cloned by reference count.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

/// Longest device id, in bytes, that a store column holds
pub const MAX_DEVICE_ID_LEN: usize = 64;

/// Identifier of the device that published a reading.
///
/// # Examples
/// ```
/// use contracts::DeviceId;
///
/// let id: DeviceId = "esp32_1".into();
/// assert_eq!(id, "esp32_1");
/// assert!(!id.is_empty());
/// ```
#[derive(Clone)]
pub struct DeviceId(Arc<str>);

impl DeviceId {
    #[inline]
    pub fn new(s: &str) -> Self {
        Self(Arc::from(s))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for DeviceId {
    type Target = str;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for DeviceId {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for DeviceId {
    #[inline]
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceId {
    #[inline]
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for DeviceId {
    #[inline]
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({:?})", self.0)
    }
}

impl PartialEq for DeviceId {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Eq for DeviceId {}

impl PartialEq<str> for DeviceId {
    #[inline]
    fn eq(&self, other: &str) -> bool {
        self.0.as_ref() == other
    }
}

impl PartialEq<&str> for DeviceId {
    #[inline]
    fn eq(&self, other: &&str) -> bool {
        self.0.as_ref() == *other
    }
}

impl PartialEq<String> for DeviceId {
    #[inline]
    fn eq(&self, other: &String) -> bool {
        self.0.as_ref() == other
    }
}

// Hashes like `str` so `HashMap<DeviceId, _>` can be queried with `&str`.
impl Hash for DeviceId {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

impl Serialize for DeviceId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for DeviceId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_clone_shares_storage() {
        let id1: DeviceId = "esp32_1".into();
        let id2 = id1.clone();
        assert_eq!(id1.as_str().as_ptr(), id2.as_str().as_ptr());
    }

    #[test]
    fn test_lookup_by_str() {
        let mut counts: HashMap<DeviceId, u32> = HashMap::new();
        counts.insert("esp32_1".into(), 3);
        counts.insert("esp32_2".into(), 1);
        assert_eq!(counts.get("esp32_1"), Some(&3));
    }

    #[test]
    fn test_serde_as_plain_string() {
        let id: DeviceId = "gate-7".into();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"gate-7\"");
        let parsed: DeviceId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }
}
