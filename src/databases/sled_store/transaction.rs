use std::collections::BTreeMap;

use crate::backend::{Operation, OperationOutput, UnitOfWork};
use crate::error::BackendError;
use crate::key::{decode_key, encode_key};

/// Pending writes of one unit layered over the tree.
///
/// Reads inside the unit see the pending writes. Nothing touches the tree
/// until [`WriteSet::into_batch`] is applied, which sled does atomically.
struct WriteSet<'a> {
    tree: &'a sled::Tree,
    cleared: bool,
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<'a> WriteSet<'a> {
    fn new(tree: &'a sled::Tree) -> Self {
        Self {
            tree,
            cleared: false,
            pending: BTreeMap::new(),
        }
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError> {
        if let Some(pending) = self.pending.get(key) {
            return Ok(pending.clone());
        }
        if self.cleared {
            return Ok(None);
        }
        Ok(self.tree.get(key)?.map(|value| value.to_vec()))
    }

    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.pending.insert(key, Some(value));
    }

    fn delete(&mut self, key: Vec<u8>) {
        self.pending.insert(key, None);
    }

    fn clear(&mut self) {
        self.cleared = true;
        self.pending.clear();
    }

    fn is_dirty(&self) -> bool {
        self.cleared || !self.pending.is_empty()
    }

    fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, BackendError> {
        let mut merged = BTreeMap::new();
        if !self.cleared {
            for entry in self.tree.iter() {
                let (key, value) = entry?;
                merged.insert(key.to_vec(), value.to_vec());
            }
        }
        for (key, pending) in &self.pending {
            match pending {
                Some(value) => merged.insert(key.clone(), value.clone()),
                None => merged.remove(key),
            };
        }
        Ok(merged.into_iter().collect())
    }

    fn count(&self) -> Result<u64, BackendError> {
        if !self.is_dirty() {
            return Ok(self.tree.len() as u64);
        }
        Ok(self.entries()?.len() as u64)
    }

    fn into_batch(self) -> Result<sled::Batch, BackendError> {
        let mut batch = sled::Batch::default();
        if self.cleared {
            for key in self.tree.iter().keys() {
                let key = key?;
                if !self.pending.contains_key(&*key) {
                    batch.remove(key);
                }
            }
        }
        for (key, pending) in self.pending {
            match pending {
                Some(value) => batch.insert(key, value),
                None => batch.remove(key),
            }
        }
        Ok(batch)
    }
}

/// Evaluate `unit` against `tree` and apply its writes as one batch.
pub(super) fn run_unit(
    tree: &sled::Tree,
    unit: &UnitOfWork,
) -> Result<Vec<OperationOutput>, BackendError> {
    let mut writes = WriteSet::new(tree);
    let outputs = unit
        .operations
        .iter()
        .map(|op| evaluate(&mut writes, op))
        .collect::<Result<Vec<_>, _>>()?;

    if writes.is_dirty() {
        tree.apply_batch(writes.into_batch()?)?;
        tree.flush()?;
    }
    Ok(outputs)
}

fn evaluate(writes: &mut WriteSet<'_>, op: &Operation) -> Result<OperationOutput, BackendError> {
    match op {
        Operation::Get(keys) => {
            let mut found = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some(value) = writes.get(&encode_key(key)?)? {
                    found.push((key.clone(), utf8(value)?));
                }
            }
            Ok(OperationOutput::Records(found))
        }
        Operation::Put(records) => {
            for (key, value) in records {
                writes.put(encode_key(key)?, value.as_bytes().to_vec());
            }
            Ok(OperationOutput::Done)
        }
        Operation::Delete(keys) => {
            for key in keys {
                writes.delete(encode_key(key)?);
            }
            Ok(OperationOutput::Done)
        }
        Operation::Clear => {
            writes.clear();
            Ok(OperationOutput::Done)
        }
        Operation::Scan => {
            let records = writes
                .entries()?
                .into_iter()
                .map(|(key, value)| -> Result<_, BackendError> {
                    Ok((decode_key(&key)?, utf8(value)?))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(OperationOutput::Records(records))
        }
        Operation::ScanKeys => {
            let keys = writes
                .entries()?
                .into_iter()
                .map(|(key, _)| decode_key(&key))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(OperationOutput::Keys(keys))
        }
        Operation::Count => Ok(OperationOutput::Count(writes.count()?)),
        Operation::Contains(key) => Ok(OperationOutput::Found(
            writes.get(&encode_key(key)?)?.is_some(),
        )),
    }
}

fn utf8(bytes: Vec<u8>) -> Result<String, BackendError> {
    String::from_utf8(bytes).map_err(|e| BackendError::Other(format!("stored value is not UTF-8: {e}")))
}
