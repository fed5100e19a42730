use chrono::{DateTime, Utc};

use super::snapshot::parse_creation;
use super::{Address, Addressable, Error, FileSystem, Zfs};

/// A bookmark of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bookmark {
    pub addr: Address,
}

impl Addressable for Bookmark {
    fn address(&self) -> String {
        self.addr.as_bookmark()
    }
}

/// A bookmark with associated meta-data.
#[derive(Debug, Clone, PartialEq)]
pub struct BookmarkListing {
    pub bookmark: Bookmark,
    pub created: DateTime<Utc>,
}

impl Zfs {
    /// Lists all bookmarks for a file system.
    pub async fn list_bookmarks(
        &self,
        target: &FileSystem,
    ) -> Result<Vec<BookmarkListing>, Error> {
        let out = self
            .run(
                &[
                    "list",
                    "-H",
                    "-r",
                    "-t",
                    "bookmark",
                    "-o",
                    "name,creation",
                    &target.to_string(),
                ],
                &format!("failed to list bookmarks for '{target}'"),
            )
            .await?;

        parse_bookmark_rows(&String::from_utf8_lossy(&out))
    }
}

fn parse_bookmark_rows(out: &str) -> Result<Vec<BookmarkListing>, Error> {
    let mut listing = Vec::new();

    for row in out.lines() {
        let fields: Vec<&str> = row.splitn(2, '\t').collect();
        if fields.len() != 2 {
            return Err(Error::Parse(format!(
                "list bookmarks failed: error parsing row '{row}'"
            )));
        }

        let addr = Address::parse(fields[0], '#')?;
        let created = parse_creation(fields[1])?;
        listing.push(BookmarkListing {
            bookmark: Bookmark { addr },
            created,
        });
    }
    Ok(listing)
}
