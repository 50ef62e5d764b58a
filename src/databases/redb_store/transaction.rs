use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, Table, TableDefinition};

use crate::backend::{AccessMode, Operation, OperationOutput, UnitOfWork};
use crate::error::BackendError;
use crate::key::{decode_key, encode_key};

type Records<'a> = TableDefinition<'a, &'static [u8], &'static str>;
type RecordsTable<'txn> = Table<'txn, &'static [u8], &'static str>;

/// Run every operation of `unit` inside one redb transaction.
///
/// Read-only units share a read transaction. Read-write units commit once at
/// the end, and any error drops the write transaction uncommitted.
pub(super) fn run_unit(
    db: &Database,
    records: Records<'_>,
    unit: &UnitOfWork,
) -> Result<Vec<OperationOutput>, BackendError> {
    match unit.mode {
        AccessMode::ReadOnly => {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(records)?;
            unit.operations.iter().map(|op| read(&table, op)).collect()
        }
        AccessMode::ReadWrite => {
            let write_txn = db.begin_write()?;
            let outputs = {
                let mut table = write_txn.open_table(records)?;
                unit.operations
                    .iter()
                    .map(|op| apply(&mut table, op))
                    .collect::<Result<Vec<_>, _>>()?
            };
            write_txn.commit()?;
            Ok(outputs)
        }
    }
}

fn read<T>(table: &T, op: &Operation) -> Result<OperationOutput, BackendError>
where
    T: ReadableTable<&'static [u8], &'static str> + ReadableTableMetadata,
{
    match op {
        Operation::Get(keys) => {
            let mut found = Vec::with_capacity(keys.len());
            for key in keys {
                let bytes = encode_key(key)?;
                if let Some(value) = table.get(bytes.as_slice())? {
                    found.push((key.clone(), value.value().to_string()));
                }
            }
            Ok(OperationOutput::Records(found))
        }
        Operation::Scan => {
            let mut records = Vec::new();
            for entry in table.iter()? {
                let (key, value) = entry?;
                records.push((decode_key(key.value())?, value.value().to_string()));
            }
            Ok(OperationOutput::Records(records))
        }
        Operation::ScanKeys => {
            let mut keys = Vec::new();
            for entry in table.iter()? {
                let (key, _) = entry?;
                keys.push(decode_key(key.value())?);
            }
            Ok(OperationOutput::Keys(keys))
        }
        Operation::Count => Ok(OperationOutput::Count(table.len()?)),
        Operation::Contains(key) => {
            let bytes = encode_key(key)?;
            Ok(OperationOutput::Found(table.get(bytes.as_slice())?.is_some()))
        }
        Operation::Put(_) | Operation::Delete(_) | Operation::Clear => Err(BackendError::Other(
            format!("{} requires a write transaction", op.as_ref()),
        )),
    }
}

fn apply(table: &mut RecordsTable<'_>, op: &Operation) -> Result<OperationOutput, BackendError> {
    match op {
        Operation::Put(records) => {
            for (key, value) in records {
                table.insert(encode_key(key)?.as_slice(), value.as_str())?;
            }
            Ok(OperationOutput::Done)
        }
        Operation::Delete(keys) => {
            for key in keys {
                table.remove(encode_key(key)?.as_slice())?;
            }
            Ok(OperationOutput::Done)
        }
        Operation::Clear => {
            let keys = table
                .iter()?
                .map(|entry| entry.map(|(key, _)| key.value().to_vec()))
                .collect::<Result<Vec<_>, _>>()?;
            for key in keys {
                table.remove(key.as_slice())?;
            }
            Ok(OperationOutput::Done)
        }
        _ => read(&*table, op),
    }
}
