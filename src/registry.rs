// Xilinx DisplayPort pipeline tools
//
// Copyright (C) 2026, The dptools Authors

//! Lookup of shared PHY handles.
//!
//! The PHY is set up once and then used by both the TX and the RX subsystem. Whoever brings it up
//! registers the handle under a name and the subsystems look it up from the [`Registry`]. The
//! entry lives as long as the returned [`Registration`].

use std::collections::HashMap;
use std::io::{Error, ErrorKind, Result};
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;

use crate::phy::PhyHandle;

type Entries = HashMap<String, PhyHandle>;

/// Named PHY handles shared between the pipeline blocks.
#[derive(Clone, Default)]
pub struct Registry {
    entries: Arc<Mutex<Entries>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<MutexGuard<'_, Entries>> {
        self.entries
            .lock()
            .map_err(|_| Error::new(ErrorKind::Other, "PHY registry poisoned"))
    }

    /// Registers `phy` as `name`.
    ///
    /// Returns [`ErrorKind::AlreadyExists`] if the name is taken.
    pub fn register(&self, name: &str, phy: PhyHandle) -> Result<Registration> {
        let mut entries = self.entries()?;
        if entries.contains_key(name) {
            return Err(Error::new(
                ErrorKind::AlreadyExists,
                format!("PHY {} already registered", name),
            ));
        }
        entries.insert(String::from(name), phy);
        debug!("registered PHY {}", name);

        Ok(Registration {
            name: String::from(name),
            entries: Arc::clone(&self.entries),
        })
    }

    /// Returns handle of the PHY registered as `name`.
    pub fn get(&self, name: &str) -> Result<PhyHandle> {
        self.entries()?.get(name).cloned().ok_or_else(|| {
            Error::new(
                ErrorKind::NotFound,
                format!("PHY {} not registered", name),
            )
        })
    }

    /// Returns names of the registered PHYs in sorted order.
    pub fn names(&self) -> Result<Vec<String>> {
        let mut names: Vec<_> = self.entries()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// Keeps a PHY registered. Dropping it removes the entry.
pub struct Registration {
    name: String,
    entries: Arc<Mutex<Entries>>,
}

impl Registration {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(&self.name);
            debug!("unregistered PHY {}", self.name);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config;
    use crate::phy::VideoPhy;
    use crate::sim::SimGt;

    fn handle() -> PhyHandle {
        let config = config::default().unwrap();
        VideoPhy::new(Box::new(SimGt::new()), config.phy)
            .unwrap()
            .into_handle()
    }

    #[test]
    fn register_and_get() {
        let registry = Registry::new();
        let phy = handle();

        let registration = registry.register("vphy0", Arc::clone(&phy)).unwrap();
        assert_eq!(registration.name(), "vphy0");
        assert!(Arc::ptr_eq(&registry.get("vphy0").unwrap(), &phy));
        assert_eq!(
            registry.get("vphy1").err().unwrap().kind(),
            ErrorKind::NotFound
        );

        // Clones share the entries.
        let other = registry.clone();
        assert_eq!(other.names().unwrap(), vec![String::from("vphy0")]);
    }

    #[test]
    fn duplicate_name() {
        let registry = Registry::new();
        let _registration = registry.register("vphy0", handle()).unwrap();

        assert_eq!(
            registry.register("vphy0", handle()).err().map(|e| e.kind()),
            Some(ErrorKind::AlreadyExists)
        );
    }

    #[test]
    fn drop_unregisters() {
        let registry = Registry::new();
        {
            let _registration = registry.register("vphy0", handle()).unwrap();
            assert!(registry.get("vphy0").is_ok());
        }
        assert!(registry.get("vphy0").is_err());
        assert!(registry.names().unwrap().is_empty());

        registry.register("vphy0", handle()).unwrap();
    }
}
