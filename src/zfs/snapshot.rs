// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use chrono::{DateTime, Local, NaiveDateTime, Utc};

use super::{Address, Addressable, Error, FileSystem, Zfs, CREATION_TIME};

/// A point-in-time read-only view of a file system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub addr: Address,
}

impl Addressable for Snapshot {
    fn address(&self) -> String {
        self.addr.as_snapshot()
    }
}

/// A listed snapshot with the properties replication cares about.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotListing {
    pub snapshot: Snapshot,
    pub created: DateTime<Utc>,
    /// The pool assigned stable identity (GUID).
    pub identity: String,
    /// Transaction group number, used only for ordering.
    pub transaction: u64,
    pub holds: Vec<String>,
}

impl Zfs {
    /// Lists all snapshots for a target in transaction order.
    pub async fn list_snapshots(
        &self,
        target: &FileSystem,
    ) -> Result<Vec<SnapshotListing>, Error> {
        let out = self
            .run(
                &[
                    "list",
                    "-H",
                    "-r",
                    "-t",
                    "snapshot",
                    "-o",
                    "name,creation,guid,createtxg",
                    "-s",
                    "createtxg",
                    &target.to_string(),
                ],
                &format!("failed to list snapshots for '{target}'"),
            )
            .await?;

        let mut listing = Vec::new();
        for (snapshot, created, identity, transaction) in
            parse_snapshot_rows(&String::from_utf8_lossy(&out))?
        {
            let holds = self.list_holds(&snapshot).await?;
            listing.push(SnapshotListing {
                snapshot,
                created,
                identity,
                transaction,
                holds,
            });
        }
        Ok(listing)
    }

    /// Creates a snapshot.
    pub async fn create_snapshot(&self, snapshot: &Snapshot) -> Result<(), Error> {
        let address = snapshot.address();
        self.run(
            &["snapshot", &address],
            &format!("failed to snapshot '{address}'"),
        )
        .await?;
        Ok(())
    }

    /// Places a hold on a snapshot.
    pub async fn hold_snapshot(&self, snapshot: &Snapshot, tag: &str) -> Result<(), Error> {
        self.run(
            &["hold", tag, &snapshot.address()],
            &format!("failed to hold '{tag}'"),
        )
        .await?;
        Ok(())
    }

    /// Releases a hold on a snapshot. Releasing an absent tag is not an
    /// error.
    pub async fn release_snapshot(&self, snapshot: &Snapshot, tag: &str) -> Result<(), Error> {
        match self
            .run(
                &["release", tag, &snapshot.address()],
                &format!("failed to release '{tag}'"),
            )
            .await
        {
            Err(Error::Command { stderr, .. })
                if stderr.ends_with("no such tag on this dataset") =>
            {
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }

    /// Returns any holds on a snapshot.
    pub async fn list_holds(&self, snapshot: &Snapshot) -> Result<Vec<String>, Error> {
        let out = self
            .run(
                &["holds", "-H", &snapshot.address()],
                "failed to list holds",
            )
            .await?;

        parse_holds_rows(&String::from_utf8_lossy(&out))
    }
}

fn parse_snapshot_rows(
    out: &str,
) -> Result<Vec<(Snapshot, DateTime<Utc>, String, u64)>, Error> {
    let mut rows = Vec::new();

    for row in out.lines() {
        let fields: Vec<&str> = row.splitn(4, '\t').collect();
        if fields.len() != 4 {
            return Err(Error::Parse(format!(
                "list snapshots failed: error parsing row '{row}'"
            )));
        }

        let addr = Address::parse(fields[0], '@')?;
        let created = parse_creation(fields[1])?;
        let transaction = fields[3].trim().parse::<u64>().map_err(|_| {
            Error::Parse(format!("list snapshots failed: error parsing row '{row}'"))
        })?;

        rows.push((
            Snapshot { addr },
            created,
            fields[2].to_string(),
            transaction,
        ));
    }
    Ok(rows)
}

fn parse_holds_rows(out: &str) -> Result<Vec<String>, Error> {
    let mut holds = Vec::new();

    for row in out.lines() {
        let fields: Vec<&str> = row.split('\t').collect();
        if fields.len() != 3 {
            return Err(Error::Parse(format!(
                "list holds failed: error parsing row '{row}'"
            )));
        }
        holds.push(fields[1].to_string());
    }
    Ok(holds)
}

/// The utility prints creation times in local time; stored times are UTC.
pub(crate) fn parse_creation(text: &str) -> Result<DateTime<Utc>, Error> {
    let naive = NaiveDateTime::parse_from_str(text.trim(), CREATION_TIME)
        .map_err(|err| Error::Parse(format!("error parsing creation '{text}': {err}")))?;

    naive
        .and_local_timezone(Local)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| Error::Parse(format!("error parsing creation '{text}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn parses_a_creation_time() {
        let created = parse_creation("Wed Oct  6 21:11 2021").unwrap();

        // Round trip back into the zone the utility reported in.
        let local = created.with_timezone(&Local).naive_local();
        assert_eq!(local.year(), 2021);
        assert_eq!(local.month(), 10);
        assert_eq!(local.day(), 6);
        assert_eq!(local.hour(), 21);
        assert_eq!(local.minute(), 11);
    }

    #[test]
    fn parses_a_double_digit_day() {
        assert!(parse_creation("Mon Jan 17 05:00 2022").is_ok());
    }

    #[test]
    fn rejects_garbage_creation_times() {
        assert!(parse_creation("last tuesday").is_err());
    }

    #[test]
    fn parses_snapshot_rows() {
        let out = "pool-0/test@daily-00001\tWed Oct  6 21:11 2021\t4242424242\t100\n\
                   pool-0/test@daily-00002\tThu Oct  7 21:11 2021\t4242424243\t250\n";

        let rows = parse_snapshot_rows(out).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0.address(), "pool-0/test@daily-00001");
        assert_eq!(rows[0].2, "4242424242");
        assert_eq!(rows[0].3, 100);
        assert_eq!(rows[1].3, 250);
    }

    #[test]
    fn rejects_short_snapshot_rows() {
        let err = parse_snapshot_rows("pool-0/test@daily-00001\tonly-two\n").unwrap_err();
        assert!(err.to_string().contains("error parsing row"));
    }

    #[test]
    fn parses_holds_rows() {
        let out = "pool-0/test@daily-00001\tbackblaze\tWed Oct  6 21:11 2021\n\
                   pool-0/test@daily-00001\toffsite\tWed Oct  6 21:12 2021\n";

        let holds = parse_holds_rows(out).unwrap();
        assert_eq!(holds, vec!["backblaze", "offsite"]);
    }

    #[test]
    fn rejects_malformed_holds_rows() {
        assert!(parse_holds_rows("pool-0/test@daily-00001\tbackblaze\n").is_err());
    }
}
