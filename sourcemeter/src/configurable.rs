//! Parameter cache with lazy hardware synchronization.
//!
//! Parameters are SCPI headers such as `SOURCE:FUNC`. Setting a parameter to
//! the value it already has in the cache does not touch the hardware unless
//! forced. Reading a parameter is served from the cache, falling back to a
//! `<key>?` query when the value is unknown or the caller forces it.

use std::collections::BTreeMap;

use crate::protocol::{ParamValue, Scalar};
use crate::transport::Transport;

pub trait ParamCache {
    /// Record `value` for `key` and write `<key> <value>` to the hardware if
    /// it differs from the cached value or `force_hardware` is set.
    /// A `None` value sends the bare `<key>` as an action and caches nothing.
    fn set_config_param(&mut self, key: &str, value: Option<Scalar>, force_hardware: bool) -> crate::Result<()>;

    fn get_config_param(&mut self, key: &str, force_hardware: bool) -> crate::Result<ParamValue>;

    /// Forget everything, e.g. after the instrument was reset.
    fn invalidate(&mut self);

    fn snapshot(&self) -> BTreeMap<String, ParamValue>;

    fn restore(&mut self, params: BTreeMap<String, ParamValue>);
}

pub struct Configurable<T> {
    transport: T,
    params: BTreeMap<String, ParamValue>,
}

impl<T: Transport> Configurable<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            params: BTreeMap::new(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    pub fn cached(&self, key: &str) -> Option<&ParamValue> {
        self.params.get(key)
    }
}

impl<T: Transport> ParamCache for Configurable<T> {
    fn set_config_param(&mut self, key: &str, value: Option<Scalar>, force_hardware: bool) -> crate::Result<()> {
        let value = match value {
            Some(value) => value,
            None => return self.transport.write(key),
        };
        let unchanged = matches!(self.params.get(key), Some(ParamValue::Scalar(x)) if *x == value);
        if unchanged && !force_hardware {
            log::debug!("{} already set to {}", key, value);
            return Ok(());
        }
        self.transport.write(&format!("{} {}", key, value))?;
        self.params.insert(key.to_string(), ParamValue::Scalar(value));
        Ok(())
    }

    fn get_config_param(&mut self, key: &str, force_hardware: bool) -> crate::Result<ParamValue> {
        if !force_hardware {
            if let Some(ret) = self.params.get(key) {
                return Ok(ret.clone());
            }
        }
        let reply = self.transport.query(&format!("{}?", key))?;
        let ret = ParamValue::Scalar(Scalar::from_reply(&reply));
        self.params.insert(key.to_string(), ret.clone());
        Ok(ret)
    }

    fn invalidate(&mut self) {
        self.params.clear();
    }

    fn snapshot(&self) -> BTreeMap<String, ParamValue> {
        self.params.clone()
    }

    fn restore(&mut self, params: BTreeMap<String, ParamValue>) {
        self.params = params;
    }
}

impl<T: Transport> Transport for Configurable<T> {
    fn write(&mut self, msg: &str) -> crate::Result<()> {
        self.transport.write(msg)
    }

    fn query(&mut self, msg: &str) -> crate::Result<String> {
        self.transport.query(msg)
    }
}
