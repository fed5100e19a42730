use std::fmt;
use std::str::FromStr;

use super::{Error, Zfs};

/// A named, mountable file system in a pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileSystem {
    pub pool: String,
    pub name: String,
}

impl fmt::Display for FileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pool, self.name)
    }
}

impl FromStr for FileSystem {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.split_once('/') {
            Some((pool, name)) if !pool.is_empty() && !name.is_empty() => Ok(Self {
                pool: pool.to_string(),
                name: name.to_string(),
            }),
            _ => Err(Error::Parse(format!("error parsing '{value}'"))),
        }
    }
}

/// A file system component address (e.g. snapshot).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub file_system: FileSystem,
    pub name: String,
}

impl Address {
    /// Parses an address using a separator token (e.g. '@' for snapshot).
    pub fn parse(address: &str, token: char) -> Result<Self, Error> {
        let (file_system, name) = address
            .split_once(token)
            .ok_or_else(|| Error::Parse(format!("error parsing address '{address}'")))?;

        Ok(Self {
            file_system: file_system.parse()?,
            name: name.to_string(),
        })
    }

    pub(crate) fn as_snapshot(&self) -> String {
        format!("{}@{}", self.file_system, self.name)
    }

    pub(crate) fn as_bookmark(&self) -> String {
        format!("{}#{}", self.file_system, self.name)
    }
}

/// Resolves a file system component address.
pub trait Addressable {
    fn address(&self) -> String;
}

impl Zfs {
    /// Destroys the object at the address.
    pub async fn destroy<A: Addressable>(&self, target: &A) -> Result<(), Error> {
        let address = target.address();
        self.run(&["destroy", &address], &format!("failed to destroy '{address}'"))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_file_system() {
        let fs: FileSystem = "pool-0/test".parse().unwrap();
        assert_eq!(fs.pool, "pool-0");
        assert_eq!(fs.name, "test");
        assert_eq!(fs.to_string(), "pool-0/test");
    }

    #[test]
    fn file_system_name_keeps_nested_segments() {
        let fs: FileSystem = "pool-0/data/nested".parse().unwrap();
        assert_eq!(fs.name, "data/nested");
    }

    #[test]
    fn rejects_a_bare_pool() {
        assert!("pool-0".parse::<FileSystem>().is_err());
        assert!("pool-0/".parse::<FileSystem>().is_err());
    }

    #[test]
    fn parses_a_snapshot_address() {
        let addr = Address::parse("pool-0/test@daily-00001", '@').unwrap();
        assert_eq!(addr.file_system.to_string(), "pool-0/test");
        assert_eq!(addr.name, "daily-00001");
        assert_eq!(addr.as_snapshot(), "pool-0/test@daily-00001");
        assert_eq!(addr.as_bookmark(), "pool-0/test#daily-00001");
    }

    #[test]
    fn rejects_an_address_without_token() {
        assert!(Address::parse("pool-0/test", '@').is_err());
    }
}
