use crate::bail;
use crate::decoder::DecodedMessage;
use crate::error::{ErrorKind, OracleResult};
use crate::types::DecodedRecord;

pub(crate) fn expect_key(message: &DecodedMessage) -> OracleResult<&DecodedRecord> {
    match &message.key {
        Some(key) => Ok(key),
        None => bail!(
            ErrorKind::AssertionFailure,
            "Message of a keyed table has no key",
            format!("message #{}", message.index)
        ),
    }
}

pub(crate) fn expect_no_key(message: &DecodedMessage) -> OracleResult<()> {
    if let Some(key) = &message.key {
        bail!(
            ErrorKind::AssertionFailure,
            "Message of a keyless table has a key",
            format!("message #{} has key {key}", message.index)
        );
    }

    Ok(())
}

pub(crate) fn expect_value(message: &DecodedMessage) -> OracleResult<&DecodedRecord> {
    match &message.value {
        Some(value) => Ok(value),
        None => bail!(
            ErrorKind::AssertionFailure,
            "Message has no value",
            format!("message #{} is a tombstone", message.index)
        ),
    }
}

/// Checks that `message` is a tombstone: it carries a key and no value.
pub(crate) fn expect_tombstone(message: &DecodedMessage) -> OracleResult<()> {
    expect_key(message)?;
    if let Some(value) = &message.value {
        bail!(
            ErrorKind::AssertionFailure,
            "Delete was not published as a tombstone",
            format!("message #{} has value {value}", message.index)
        );
    }

    Ok(())
}

/// Checks that two messages were published for the same row.
pub(crate) fn expect_same_key(first: &DecodedMessage, second: &DecodedMessage) -> OracleResult<()> {
    let (first_key, second_key) = (expect_key(first)?, expect_key(second)?);
    if first_key != second_key {
        bail!(
            ErrorKind::AssertionFailure,
            "Messages of the same row have different keys",
            format!(
                "message #{} has key {first_key}, message #{} has key {second_key}",
                first.index, second.index
            )
        );
    }

    Ok(())
}

pub(crate) fn expect_int(record: &DecodedRecord, field: &str, expected: i64) -> OracleResult<()> {
    let actual = record.fetch_int(field)?;
    if actual != expected {
        bail!(
            ErrorKind::AssertionFailure,
            "Decoded field does not hold the expected integer",
            format!("field '{field}' is {actual}, expected {expected} in {record}")
        );
    }

    Ok(())
}

pub(crate) fn expect_string(
    record: &DecodedRecord,
    field: &str,
    expected: &str,
) -> OracleResult<()> {
    let actual = record.fetch_string(field)?;
    if actual != expected {
        bail!(
            ErrorKind::AssertionFailure,
            "Decoded field does not hold the expected string",
            format!("field '{field}' is {actual:?}, expected {expected:?} in {record}")
        );
    }

    Ok(())
}
