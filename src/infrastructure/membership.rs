use std::collections::HashSet;
use std::io;
use std::sync::RwLock;

use crate::domain::ports::ClusterMembership;

/// In-memory membership view, updated by whatever observes the cluster.
#[derive(Debug, Default)]
pub struct StaticMembership {
    members: RwLock<HashSet<String>>,
}

impl StaticMembership {
    pub fn new(members: impl IntoIterator<Item = String>) -> Self {
        Self {
            members: RwLock::new(members.into_iter().collect()),
        }
    }

    pub fn add(&self, endpoint: impl Into<String>) -> io::Result<()> {
        self.write()?.insert(endpoint.into());
        Ok(())
    }

    pub fn remove(&self, endpoint: &str) -> io::Result<bool> {
        Ok(self.write()?.remove(endpoint))
    }

    pub fn replace(&self, members: impl IntoIterator<Item = String>) -> io::Result<()> {
        *self.write()? = members.into_iter().collect();
        Ok(())
    }

    fn write(&self) -> io::Result<std::sync::RwLockWriteGuard<'_, HashSet<String>>> {
        self.members
            .write()
            .map_err(|e| io::Error::other(format!("membership lock poisoned: {e}")))
    }
}

impl ClusterMembership for StaticMembership {
    fn members(&self) -> io::Result<HashSet<String>> {
        self.members
            .read()
            .map(|members| members.clone())
            .map_err(|e| io::Error::other(format!("membership lock poisoned: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_updates() {
        let membership = StaticMembership::new(["10.0.0.1:5701".to_string()]);
        membership.add("10.0.0.2:5701").unwrap();
        assert_eq!(membership.members().unwrap().len(), 2);

        assert!(membership.remove("10.0.0.1:5701").unwrap());
        assert!(!membership.remove("10.0.0.1:5701").unwrap());

        membership.replace(Vec::new()).unwrap();
        assert!(membership.members().unwrap().is_empty());
    }
}
