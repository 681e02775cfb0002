//! One-shot artifact construction.
//!
//! A [`Builder`] owns a growable region laid out exactly like the published
//! file minus the header: keyspace first, arena after. Records append to the
//! arena; slots point back at them. `finalize` writes header + region (+
//! duplicate pool for the dedup kinds) under a temp name and renames it into
//! place, so readers never observe a partial artifact.

use std::collections::HashMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use tracing::{debug, info};

use strata_types::constants::{
    limit, settings_key, FORMAT_VERSION, HEADER_SIZE, LATEST_TIMESTAMP_SUFFIX,
    LINEAR_PROBE_MAX_LOAD_FACTOR, MAX_OFFSET_BITS, MIN_OFFSET_BITS, NAME_START,
};
use strata_types::properties::{self, Properties};
use strata_types::value::STRING_NO_TERMINATOR;
use strata_types::{CacheError, CacheHeader, CacheKind, Result, ValueKind};
use strata_wire::hash::{hash_func_id, key_hash};
use strata_wire::list;
use strata_wire::pool::encode_pool;
use strata_wire::record::{
    append_chain, append_linear, append_linear_pooled, parse_chain, patch_chain_next,
};
use strata_wire::slot::{pack_slot, read_slot, write_slot};

use crate::options::WriterOptions;
use crate::probe::{BucketProbe, LinearProbe, SlotSearch};

enum TableState {
    Linear(LinearProbe),
    Bucket(BucketProbe),
}

/// One-shot writer for a single artifact.
pub struct Builder {
    task: String,
    destination: PathBuf,
    kind: CacheKind,
    table: TableState,
    generate_timestamp_file: bool,
    rename_cache_file: bool,
    max_load_factor: f64,

    /// Keyspace + arena, header excluded.
    mem: Vec<u8>,
    keyspace_size: u64,
    entries: u64,
    max_entries: u64,
    max_collisions: u32,

    pool_values: Vec<Vec<u8>>,
    pool_index: HashMap<Vec<u8>, u16>,
    pool_sealed: bool,

    last_key: Option<Vec<u8>>,
    poisoned: bool,
}

impl Builder {
    /// Validate configuration and allocate the keyspace.
    ///
    /// When `settings_location` points at a properties file, the destination
    /// folder, cache kind, offset bits, and load factor stored there
    /// override the option values. When it is `None`, a properties file is
    /// materialized next to the artifact so later runs and readers can
    /// discover the build parameters.
    pub fn open(options: &WriterOptions) -> Result<Builder> {
        let mut destination = options.destination.clone();
        let mut kind = options.cache_kind;
        let mut offset_bits = options.offset_bits;
        let mut max_load_factor = options.max_load_factor;

        if let Some(location) = &options.settings_location {
            let props = properties::load_properties_file(location)?;
            if let Some(folder) = props.get(settings_key::DESTINATION_FOLDER) {
                destination = PathBuf::from(folder);
            }
            kind = CacheKind::try_from(
                properties::get_u64(&props, settings_key::CACHE_TYPE, kind as u64) as u16,
            )
            .map_err(|err| CacheError::ConfigInvalid(err.to_string()))?;
            offset_bits =
                properties::get_u64(&props, settings_key::OFFSET_BITS, offset_bits as u64) as u16;
            max_load_factor =
                properties::get_f64(&props, settings_key::MAX_LOAD_FACTOR, max_load_factor);
        }

        if options.task.is_empty() {
            return Err(CacheError::ConfigInvalid("task name is empty".into()));
        }
        if options.num_slots == 0 {
            return Err(CacheError::ConfigInvalid("number of key slots is zero".into()));
        }

        let table = match kind {
            CacheKind::LinearProbe | CacheKind::LinearProbeDedup | CacheKind::LinearProbeDedupTyped => {
                if !(MIN_OFFSET_BITS..=MAX_OFFSET_BITS).contains(&offset_bits) {
                    return Err(CacheError::ConfigInvalid(format!(
                        "offset bits must be in range [{MIN_OFFSET_BITS}, {MAX_OFFSET_BITS}], got {offset_bits}"
                    )));
                }
                if max_load_factor > LINEAR_PROBE_MAX_LOAD_FACTOR {
                    return Err(CacheError::ConfigInvalid(format!(
                        "load factor for linear probe can't be greater than {LINEAR_PROBE_MAX_LOAD_FACTOR}"
                    )));
                }
                TableState::Linear(LinearProbe::new(offset_bits, options.num_slots)?)
            }
            CacheKind::BucketChain => TableState::Bucket(BucketProbe::new(options.num_slots)?),
            other => {
                return Err(CacheError::ConfigInvalid(format!(
                    "cache kind {other} cannot be written"
                )))
            }
        };

        fs::create_dir_all(&destination)?;
        if options.settings_location.is_none() {
            let mut props = Properties::new();
            props.insert(
                settings_key::DESTINATION_FOLDER.into(),
                destination.display().to_string(),
            );
            props.insert(settings_key::CACHE_TYPE.into(), (kind as u16).to_string());
            props.insert(settings_key::OFFSET_BITS.into(), offset_bits.to_string());
            let path = destination.join(format!("{}.properties", options.task));
            properties::write_properties_file(&props, &path)?;
        }

        let (keyspace_size, slots) = match &table {
            TableState::Linear(p) => (p.keyspace_size(), p.slots()),
            TableState::Bucket(p) => (p.keyspace_size(), p.slots()),
        };

        info!(
            task = %options.task,
            slots,
            kind = %kind,
            offset_bits,
            "creating cache"
        );

        Ok(Builder {
            task: options.task.clone(),
            destination,
            kind,
            table,
            generate_timestamp_file: options.generate_timestamp_file,
            rename_cache_file: options.rename_cache_file,
            max_load_factor,
            mem: vec![0u8; keyspace_size as usize],
            keyspace_size,
            entries: 0,
            max_entries: (slots as f64 * max_load_factor) as u64,
            max_collisions: 0,
            pool_values: Vec::new(),
            pool_index: HashMap::new(),
            pool_sealed: false,
            last_key: None,
            poisoned: false,
        })
    }

    /// Register a frequently repeated value. Must precede key insertion;
    /// registration order defines pool indices. Values are stored in their
    /// encoded form so inserts match them byte-for-byte.
    pub fn add_duplicate_value(&mut self, value: &[u8], tag: u8) -> Result<()> {
        if !self.kind.is_dedup() {
            debug!(kind = %self.kind, "ignoring duplicate value for non-dedup cache");
            return Ok(());
        }
        if self.pool_sealed {
            return Err(CacheError::ConfigInvalid(
                "duplicate values are already sealed".into(),
            ));
        }
        if self.entries > 0 {
            return Err(CacheError::ConfigInvalid(
                "duplicate values must be added before key insertion".into(),
            ));
        }
        if self.pool_values.len() >= limit::MAX_POOL_VALUES {
            return Err(CacheError::ConfigInvalid(format!(
                "should not set more than {} duplicated values",
                limit::MAX_POOL_VALUES
            )));
        }

        let encoded = match tag {
            t if t == ValueKind::String as u8 => list::string_bytes(value),
            STRING_NO_TERMINATOR => list::string_bytes(list::truncate_at_nul(value)),
            t if t == ValueKind::FloatList as u8 => {
                list::float_list_bytes(&parse_float_text(value)?)
            }
            _ => value.to_vec(),
        };

        let index = self.pool_values.len() as u16;
        // First registration of identical bytes wins the index.
        self.pool_index.entry(encoded.clone()).or_insert(index);
        self.pool_values.push(encoded);
        Ok(())
    }

    /// Seal the duplicate-value pool.
    pub fn finish_duplicates(&mut self) -> Result<()> {
        if self.pool_sealed {
            return Err(CacheError::ConfigInvalid(
                "duplicate values were already sealed".into(),
            ));
        }
        self.pool_sealed = true;
        debug!(values = self.pool_values.len(), "sealed duplicate-value pool");
        Ok(())
    }

    /// Insert one typed record.
    ///
    /// Scalar tags parse their textual input (`Bool`: true/false/1/0,
    /// `Int64`/`Double`: decimal, `FloatList`: `:`-separated). `StringList`
    /// input is `|`-separated and the elements are stored sorted. An empty
    /// value with a non-string tag is a silent no-op.
    ///
    /// Duplicate keys: a key equal to the immediately preceding insert is
    /// collapsed (first write wins); a duplicate detected by probing
    /// rewrites the slot to a fresh record (last write wins).
    pub fn insert(&mut self, key: &[u8], value: &[u8], tag: u8) -> Result<()> {
        if key.is_empty() {
            return Err(CacheError::EmptyKey);
        }
        if value.is_empty() && tag != ValueKind::String as u8 && tag != STRING_NO_TERMINATOR {
            return Ok(());
        }

        if tag == ValueKind::StringList as u8 {
            let mut items: Vec<&[u8]> = value.split(|&b| b == b'|').collect();
            items.sort();
            return self.insert_string_list(key, &items);
        }

        let (kind, encoded) = encode_scalar(tag, value)?;
        self.insert_encoded(key, kind, &encoded)
    }

    /// Insert a string value as-is.
    pub fn insert_string(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.insert(key, value, ValueKind::String as u8)
    }

    /// Insert a list of strings, preserving element order.
    pub fn insert_string_list<S: AsRef<[u8]>>(&mut self, key: &[u8], items: &[S]) -> Result<()> {
        if key.is_empty() {
            return Err(CacheError::EmptyKey);
        }
        let encoded = list::string_list_bytes(items)?;
        self.insert_encoded(key, ValueKind::StringList, &encoded)
    }

    pub fn insert_bool(&mut self, key: &[u8], value: bool) -> Result<()> {
        self.insert_encoded(key, ValueKind::Bool, &list::bool_bytes(value))
    }

    pub fn insert_i64(&mut self, key: &[u8], value: i64) -> Result<()> {
        self.insert_encoded(key, ValueKind::Int64, &list::i64_bytes(value))
    }

    pub fn insert_f64(&mut self, key: &[u8], value: f64) -> Result<()> {
        self.insert_encoded(key, ValueKind::Double, &list::f64_bytes(value))
    }

    pub fn insert_float_list(&mut self, key: &[u8], values: &[f32]) -> Result<()> {
        self.insert_encoded(key, ValueKind::FloatList, &list::float_list_bytes(values))
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }

    pub fn max_collisions(&self) -> u32 {
        self.max_collisions
    }

    fn insert_encoded(&mut self, key: &[u8], kind: ValueKind, encoded: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(CacheError::EmptyKey);
        }
        if self.poisoned {
            return Err(CacheError::ConfigInvalid(
                "builder is unusable after a previous hard error".into(),
            ));
        }
        if self.last_key.as_deref() == Some(key) {
            debug!(key = %String::from_utf8_lossy(key), "collapsing consecutive duplicate key");
            return Ok(());
        }

        let result = match self.table {
            TableState::Linear(probe) => self.insert_linear(probe, key, kind, encoded),
            TableState::Bucket(probe) => self.insert_chain(probe, key, kind, encoded),
        };
        match result {
            Ok(()) => {
                self.last_key = Some(key.to_vec());
                Ok(())
            }
            Err(err) => {
                self.poisoned = true;
                Err(err)
            }
        }
    }

    fn insert_linear(
        &mut self,
        probe: LinearProbe,
        key: &[u8],
        kind: ValueKind,
        encoded: &[u8],
    ) -> Result<()> {
        let hash = key_hash(key);
        let (search, collisions) = probe.find_free(&self.mem, key, hash)?;
        let (slot_offset, is_new) = match search {
            SlotSearch::Empty { slot_offset } => {
                if self.entries >= self.max_entries {
                    return Err(CacheError::KeyspaceFull {
                        entries: self.entries,
                        slots: probe.slots(),
                    });
                }
                (slot_offset, true)
            }
            // Non-consecutive duplicate: point the slot at a fresh record.
            SlotSearch::Exists { slot_offset } => (slot_offset, false),
            SlotSearch::Saturated => {
                return Err(CacheError::KeyspaceFull {
                    entries: self.entries,
                    slots: probe.slots(),
                })
            }
        };

        let pooled = self
            .pool_index
            .get(encoded)
            .copied()
            .map(|index| (index, encoded.len() as u32));

        let arena_offset = self.mem.len() as u64 - self.keyspace_size;
        let biased = probe.bias_arena_offset(arena_offset);
        // The stored offset addresses the record start; reject before
        // appending so a failed insert leaves no trace in the arena.
        if biased & probe.offset_mask() != biased {
            return Err(CacheError::OffsetBitsExhausted {
                offset_bits: probe.offset_bits(),
            });
        }

        match pooled {
            Some((index, val_len)) => {
                append_linear_pooled(&mut self.mem, key, kind as u8, val_len, index)?;
            }
            None => {
                append_linear(&mut self.mem, key, kind as u8, encoded)?;
            }
        }

        let slot = pack_slot(hash, biased, probe.hashcode_mask());
        write_slot(&mut self.mem, slot_offset / 8, slot);

        self.max_collisions = self.max_collisions.max(collisions);
        if is_new {
            self.entries += 1;
        }
        Ok(())
    }

    fn insert_chain(
        &mut self,
        probe: BucketProbe,
        key: &[u8],
        kind: ValueKind,
        encoded: &[u8],
    ) -> Result<()> {
        let hash = key_hash(key);
        let mut link_at = probe.slot_offset(hash);
        let mut current = read_slot(&self.mem, link_at / 8);
        let mut collisions = 0u32;

        while current != 0 {
            let record = parse_chain(&self.mem, current as usize)?;
            if record.key == key {
                // Non-consecutive duplicate: splice a fresh record into the
                // chain where the old one sat.
                let old_next = record.next;
                let new_at = append_chain(&mut self.mem, key, kind as u8, encoded)?;
                patch_chain_next(&mut self.mem, new_at, old_next);
                patch_chain_next(&mut self.mem, link_at, new_at);
                self.max_collisions = self.max_collisions.max(collisions);
                return Ok(());
            }
            collisions += 1;
            link_at = current; // the next-pointer is the record's first field
            current = record.next;
        }

        if self.entries >= self.max_entries {
            return Err(CacheError::KeyspaceFull {
                entries: self.entries,
                slots: probe.slots(),
            });
        }

        let new_at = append_chain(&mut self.mem, key, kind as u8, encoded)?;
        patch_chain_next(&mut self.mem, link_at, new_at);
        self.max_collisions = self.max_collisions.max(collisions);
        self.entries += 1;
        Ok(())
    }

    /// Write, flush, and atomically publish the artifact. Returns the
    /// publication timestamp in milliseconds.
    pub fn finalize(self) -> Result<u64> {
        if self.poisoned {
            return Err(CacheError::ConfigInvalid(
                "builder is unusable after a previous hard error".into(),
            ));
        }

        let header = self.make_header()?;
        let cache_path = self
            .destination
            .join(format!("{}{}", self.task, strata_types::constants::CACHE_FILE_SUFFIX));
        let tmp_path = self.destination.join(format!(
            "{}{}.tmp.{}",
            self.task,
            strata_types::constants::CACHE_FILE_SUFFIX,
            rand::thread_rng().gen::<u32>()
        ));

        info!(path = %tmp_path.display(), entries = self.entries, "writing cache");
        let file = fs::File::create(&tmp_path)?;
        let mut out = BufWriter::new(file);
        out.write_all(&header.encode())?;
        out.write_all(&self.mem)?;
        if self.kind.is_dedup() {
            out.write_all(&encode_pool(&self.pool_values)?)?;
        }
        out.flush()?;
        out.into_inner()
            .map_err(|err| CacheError::Io(err.into_error()))?
            .sync_all()?;

        fs::rename(&tmp_path, &cache_path)?;

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|err| CacheError::ConfigInvalid(err.to_string()))?
            .as_millis() as u64;

        if self.rename_cache_file {
            let timestamped = self
                .destination
                .join(format!("{}.{}.cache", self.task, timestamp));
            fs::rename(&cache_path, &timestamped)?;
        }
        // The readiness marker goes last: a reader that sees it is
        // guaranteed to find the data.
        if self.generate_timestamp_file {
            let marker = self.destination.join(format!(
                "{}{}{}",
                self.task,
                strata_types::constants::CACHE_FILE_SUFFIX,
                LATEST_TIMESTAMP_SUFFIX
            ));
            properties::write_string_atomic(&marker, &timestamp.to_string())?;
        }

        info!(task = %self.task, timestamp, "published cache");
        Ok(timestamp)
    }

    fn make_header(&self) -> Result<CacheHeader> {
        let creation_time_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|err| CacheError::ConfigInvalid(err.to_string()))?
            .as_millis() as u64;
        let (hashcode_bits, offset_bits, slots) = match &self.table {
            TableState::Linear(p) => (p.hashcode_bits(), p.offset_bits(), p.slots()),
            // Chain slots hold full 64-bit offsets and no fingerprint.
            TableState::Bucket(p) => (0, 64, p.slots()),
        };
        Ok(CacheHeader {
            magic_number: strata_types::constants::CACHE_HEADER_MAGIC,
            header_size: HEADER_SIZE as u16,
            name_start: NAME_START as u16,
            version: FORMAT_VERSION,
            cache_kind: self.kind as u16,
            hashcode_bits,
            offset_bits,
            hash_func_id: hash_func_id(),
            reserved: 0,
            max_collisions: self.max_collisions,
            max_load_factor: self.max_load_factor,
            creation_time_ms,
            number_of_key_slots: slots,
            number_of_entries: self.entries,
            data_size: self.mem.len() as u64 - self.keyspace_size,
            size: HEADER_SIZE as u64 + self.mem.len() as u64,
            cache_name: self.task.clone(),
        })
    }
}

/// Parse `:`-separated float text, the transport form of float lists.
fn parse_float_text(value: &[u8]) -> Result<Vec<f32>> {
    let text = std::str::from_utf8(value)
        .map_err(|_| CacheError::ConfigInvalid("float list value is not UTF-8".into()))?;
    if text.is_empty() {
        return Ok(Vec::new());
    }
    text.split(':')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .map_err(|err| CacheError::ConfigInvalid(format!("bad float '{part}': {err}")))
        })
        .collect()
}

/// Encode a scalar insert value per its API tag.
fn encode_scalar(tag: u8, value: &[u8]) -> Result<(ValueKind, Vec<u8>)> {
    match tag {
        t if t == ValueKind::String as u8 => Ok((ValueKind::String, list::string_bytes(value))),
        STRING_NO_TERMINATOR => Ok((
            ValueKind::String,
            list::string_bytes(list::truncate_at_nul(value)),
        )),
        t if t == ValueKind::Bool as u8 => {
            let text = std::str::from_utf8(value).unwrap_or("").trim();
            let parsed = match text {
                "true" | "1" => true,
                "false" | "0" => false,
                other => {
                    return Err(CacheError::ConfigInvalid(format!("bad bool value '{other}'")))
                }
            };
            Ok((ValueKind::Bool, list::bool_bytes(parsed).to_vec()))
        }
        t if t == ValueKind::Int64 as u8 => {
            let text = std::str::from_utf8(value)
                .map_err(|_| CacheError::ConfigInvalid("int64 value is not UTF-8".into()))?;
            let parsed: i64 = text.trim().parse().map_err(|err| {
                CacheError::ConfigInvalid(format!("bad int64 value '{text}': {err}"))
            })?;
            Ok((ValueKind::Int64, list::i64_bytes(parsed).to_vec()))
        }
        t if t == ValueKind::Double as u8 => {
            let text = std::str::from_utf8(value)
                .map_err(|_| CacheError::ConfigInvalid("double value is not UTF-8".into()))?;
            let parsed: f64 = text.trim().parse().map_err(|err| {
                CacheError::ConfigInvalid(format!("bad double value '{text}': {err}"))
            })?;
            Ok((ValueKind::Double, list::f64_bytes(parsed).to_vec()))
        }
        t if t == ValueKind::FloatList as u8 => Ok((
            ValueKind::FloatList,
            list::float_list_bytes(&parse_float_text(value)?),
        )),
        other => Err(CacheError::ConfigInvalid(format!(
            "value tag {other} cannot be inserted"
        ))),
    }
}
