//! How the coordinator obtains a driver for a management address.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use lbaas_core::AgentConfig;
use lbaas_driver::{ApplianceDriver, RestDriver};

use crate::error::{ClusterError, ClusterResult};

pub trait DriverFactory: Send + Sync {
    fn open(&self, hostname: &str) -> ClusterResult<Arc<dyn ApplianceDriver>>;
}

/// Opens REST sessions with the configured credentials.
pub struct RestFactory {
    port: u16,
    username: String,
    password: String,
    connect_timeout: Duration,
}

impl RestFactory {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            port: config.icontrol_port,
            username: config.icontrol_username.clone(),
            password: config.icontrol_password.clone(),
            connect_timeout: config.connection_timeout(),
        }
    }
}

impl DriverFactory for RestFactory {
    fn open(&self, hostname: &str) -> ClusterResult<Arc<dyn ApplianceDriver>> {
        let driver = RestDriver::new(hostname, self.port, &self.username, &self.password)
            .with_connect_timeout(self.connect_timeout);
        Ok(Arc::new(driver))
    }
}

/// Hands out pre-built drivers by hostname (simulated appliances).
#[derive(Default)]
pub struct FixedFactory {
    drivers: HashMap<String, Arc<dyn ApplianceDriver>>,
}

impl FixedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_driver(mut self, driver: Arc<dyn ApplianceDriver>) -> Self {
        self.drivers.insert(driver.hostname().to_string(), driver);
        self
    }
}

impl DriverFactory for FixedFactory {
    fn open(&self, hostname: &str) -> ClusterResult<Arc<dyn ApplianceDriver>> {
        self.drivers
            .get(hostname)
            .cloned()
            .ok_or_else(|| ClusterError::Config(format!("no appliance known at {hostname}")))
    }
}
