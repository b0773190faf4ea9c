use std::any::Any;
use std::collections::BTreeMap;
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Device {
    Cpu,
    Cuda(usize),
}

impl Display for Device {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(i) => write!(f, "cuda:{i}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown device {0:?}")]
pub struct DeviceParseError(String);

impl FromStr for Device {
    type Err = DeviceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            None if s == "cpu" => Ok(Device::Cpu),
            None if s == "cuda" => Ok(Device::Cuda(0)),
            Some(("cuda", idx)) => idx
                .parse()
                .map(Device::Cuda)
                .map_err(|_| DeviceParseError(s.to_string())),
            _ => Err(DeviceParseError(s.to_string())),
        }
    }
}

pub type GlobalAttr = Arc<dyn Any + Send + Sync>;

/// Backend-scoped global state: the default device plus named attributes
/// (for example the `RNG` handle of the traced backend).
#[derive(Clone, Default)]
pub struct GlobalState {
    default_device: Option<Device>,
    attrs: BTreeMap<String, GlobalAttr>,
}

impl GlobalState {
    pub fn default_device(&self) -> Option<&Device> {
        self.default_device.as_ref()
    }

    pub fn set_default_device(&mut self, device: Device) {
        self.default_device = Some(device);
    }

    pub fn unset_default_device(&mut self) {
        self.default_device = None;
    }

    pub fn set_attr(&mut self, name: &str, value: GlobalAttr) {
        self.attrs.insert(name.to_string(), value);
    }

    pub fn del_attr(&mut self, name: &str) -> Option<GlobalAttr> {
        self.attrs.remove(name)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    pub fn attr<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.attrs.get(name).cloned()?.downcast::<T>().ok()
    }

    pub fn attr_names(&self) -> impl Iterator<Item = &str> {
        self.attrs.keys().map(String::as_str)
    }
}

impl Debug for GlobalState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalState")
            .field("default_device", &self.default_device)
            .field("attrs", &self.attrs.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_parse() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("cuda:1".parse::<Device>().unwrap(), Device::Cuda(1));
        assert!("tpu".parse::<Device>().is_err());
        assert_eq!(Device::Cuda(2).to_string(), "cuda:2");
    }

    #[test]
    fn test_typed_attr_lookup() {
        let mut g = GlobalState::default();
        g.set_attr("RNG", Arc::new(7u64));
        assert_eq!(g.attr::<u64>("RNG").as_deref(), Some(&7));
        assert!(g.attr::<u32>("RNG").is_none());
        assert!(g.del_attr("RNG").is_some());
        assert!(!g.has_attr("RNG"));
    }
}
