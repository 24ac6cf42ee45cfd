//! Bounded address book persisted to a JSON file.

use std::{
    ffi::OsString,
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    net::SocketAddr,
    path::{Path, PathBuf},
};

use hashlink::LinkedHashMap;
use kestrel_net_primitives::{Error, NetworkAddress, Result};
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, trace};

/// Known peer addresses in insertion order, capped at `capacity` entries.
///
/// The book is closed until [`load`](Self::load) succeeds and closed again by
/// [`save`](Self::save); mutations on a closed book fail with
/// [`Error::ServiceStopped`]. A capacity of zero disables the book entirely.
#[derive(Debug)]
pub struct Hosts {
    path: PathBuf,
    capacity: usize,
    state: Mutex<Book>,
}

#[derive(Debug)]
struct Book {
    stopped: bool,
    addresses: LinkedHashMap<SocketAddr, NetworkAddress>,
}

impl Book {
    /// Refreshes an existing entry in place, otherwise appends and evicts the oldest.
    fn insert(&mut self, capacity: usize, address: NetworkAddress) {
        if let Some(existing) = self.addresses.get_mut(&address.authority()) {
            *existing = address;
            return;
        }
        if self.addresses.len() >= capacity {
            self.addresses.pop_front();
        }
        self.addresses.insert(address.authority(), address);
    }
}

impl Hosts {
    pub fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            path: path.into(),
            capacity,
            state: Mutex::new(Book {
                stopped: true,
                addresses: LinkedHashMap::new(),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Replaces the book with the file contents and opens it. A missing file
    /// yields an empty book.
    pub fn load(&self) -> Result<()> {
        let loaded = if self.capacity == 0 {
            Vec::new()
        } else {
            read_file(&self.path)?
        };

        let mut book = self.state.lock();
        book.addresses.clear();
        for address in loaded.into_iter().filter(NetworkAddress::is_valid) {
            book.insert(self.capacity, address);
        }
        book.stopped = false;

        debug!(count = book.addresses.len(), path = %self.path.display(), "loaded host addresses");
        Ok(())
    }

    /// Closes the book and writes it out. Saving a book that was never opened
    /// leaves the file untouched.
    pub fn save(&self) -> Result<()> {
        let snapshot: Vec<NetworkAddress> = {
            let mut book = self.state.lock();
            if std::mem::replace(&mut book.stopped, true) {
                return Ok(());
            }
            book.addresses.values().copied().collect()
        };

        if self.capacity == 0 {
            return Ok(());
        }

        write_file(&self.path, &snapshot)?;
        debug!(count = snapshot.len(), path = %self.path.display(), "saved host addresses");
        Ok(())
    }

    /// A uniformly random known address, or [`Error::NotFound`] when empty.
    pub fn fetch(&self) -> Result<NetworkAddress> {
        let book = self.state.lock();
        if book.stopped {
            return Err(Error::ServiceStopped);
        }
        if book.addresses.is_empty() {
            return Err(Error::NotFound);
        }

        let index = rand::rng().random_range(0..book.addresses.len());
        book.addresses
            .values()
            .nth(index)
            .copied()
            .ok_or(Error::NotFound)
    }

    /// Records an address. Invalid addresses are ignored.
    pub fn store(&self, address: NetworkAddress) -> Result<()> {
        self.store_many(std::slice::from_ref(&address))
    }

    pub fn store_many(&self, addresses: &[NetworkAddress]) -> Result<()> {
        let mut book = self.state.lock();
        if book.stopped {
            return Err(Error::ServiceStopped);
        }
        if self.capacity == 0 {
            return Ok(());
        }

        for address in addresses {
            if !address.is_valid() {
                trace!(%address, "ignoring invalid host address");
                continue;
            }
            book.insert(self.capacity, *address);
        }
        Ok(())
    }

    /// Forgets an address, failing with [`Error::NotFound`] if it is unknown.
    pub fn remove(&self, address: &NetworkAddress) -> Result<()> {
        let mut book = self.state.lock();
        if book.stopped {
            return Err(Error::ServiceStopped);
        }
        book.addresses
            .remove(&address.authority())
            .map(|_| ())
            .ok_or(Error::NotFound)
    }

    pub fn count(&self) -> usize {
        self.state.lock().addresses.len()
    }
}

fn read_file(path: &Path) -> Result<Vec<NetworkAddress>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let reader = BufReader::new(File::open(path)?);
    serde_json::from_reader(reader).map_err(|e| Error::Serialization(e.to_string()))
}

/// Writes to a sibling temp file first, then renames over the target.
fn write_file(path: &Path, addresses: &[NetworkAddress]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut tmp_path = OsString::from(path.as_os_str());
    tmp_path.push(".tmp");
    let tmp_path = PathBuf::from(tmp_path);
    {
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        serde_json::to_writer_pretty(&mut writer, addresses)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        writer.flush()?;
    }

    fs::rename(&tmp_path, path)?;
    Ok(())
}
