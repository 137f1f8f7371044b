//! Route snapshot file: crash-recovery seed for the registry.
//!
//! One line per host: `modid cmdid ip port`, with the ip written as an
//! unsigned 32-bit decimal.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use crate::load_balancer::endpoint::EndpointKey;
use crate::load_balancer::host::HostAddr;

/// Host lists grouped by endpoint.
pub type RouteSnapshot = Vec<(EndpointKey, Vec<HostAddr>)>;

/// Write every entry to `path`, replacing the file. Returns the line count.
///
/// The lines go to a sibling temp file that is renamed over `path`, so a
/// reader or a crash never sees a half-written snapshot.
pub fn write_snapshot(path: &Path, routes: &RouteSnapshot) -> io::Result<usize> {
    let staging = staging_path(path);
    let written = write_lines(&staging, routes).and_then(|lines| {
        std::fs::rename(&staging, path)?;
        Ok(lines)
    });
    if written.is_err() {
        let _ = std::fs::remove_file(&staging);
    }
    written
}

fn write_lines(path: &Path, routes: &RouteSnapshot) -> io::Result<usize> {
    let mut writer = BufWriter::new(File::create(path)?);
    let mut lines = 0;
    for (key, hosts) in routes {
        for host in hosts {
            writeln!(writer, "{} {} {} {}", key.modid, key.cmdid, u32::from(host.ip), host.port)?;
            lines += 1;
        }
    }
    writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    Ok(lines)
}

// `backupRoute.dat.1` -> `backupRoute.dat.1.tmp`; each shard gets its own.
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Read a snapshot back. Malformed lines are skipped.
pub fn read_snapshot(path: &Path) -> io::Result<RouteSnapshot> {
    let reader = BufReader::new(File::open(path)?);
    let mut grouped: BTreeMap<EndpointKey, Vec<HostAddr>> = BTreeMap::new();

    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(&line) {
            Some((key, host)) => grouped.entry(key).or_default().push(host),
            None => tracing::warn!(path = ?path, line = number + 1, "Skipping malformed snapshot line"),
        }
    }

    Ok(grouped.into_iter().collect())
}

fn parse_line(line: &str) -> Option<(EndpointKey, HostAddr)> {
    let mut fields = line.split_whitespace();
    let modid = fields.next()?.parse().ok()?;
    let cmdid = fields.next()?.parse().ok()?;
    let ip: u32 = fields.next()?.parse().ok()?;
    let port = fields.next()?.parse().ok()?;
    if fields.next().is_some() {
        return None;
    }
    Some((EndpointKey::new(modid, cmdid), HostAddr::new(Ipv4Addr::from(ip), port)))
}
