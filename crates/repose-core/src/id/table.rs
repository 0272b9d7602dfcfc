//! Table-backed hi-value generator
//!
//! One row per segment in `repose_id_table`. A value is claimed by an
//! optimistic `UPDATE ... WHERE next_val = <read value>`; losing the race
//! means someone else claimed it, so the read is retried.

use crate::connection::ReactiveConnection;
use crate::errors::{ReposeError, Result};
use crate::model::value::{Identifier, SqlValue};

pub const ID_TABLE: &str = "repose_id_table";
pub const ID_TABLE_SEGMENT: &str = "segment";
pub const ID_TABLE_NEXT_VALUE: &str = "next_val";

pub(crate) async fn next_value(
    connection: &dyn ReactiveConnection,
    entity_name: &str,
    segment: &str,
    max_retries: u32,
) -> Result<Identifier> {
    let select = format!(
        "SELECT {} FROM {} WHERE {} = ?",
        ID_TABLE_NEXT_VALUE, ID_TABLE, ID_TABLE_SEGMENT
    );
    let update = format!(
        "UPDATE {table} SET {next} = ? WHERE {segment} = ? AND {next} = ?",
        table = ID_TABLE,
        next = ID_TABLE_NEXT_VALUE,
        segment = ID_TABLE_SEGMENT
    );

    for attempt in 0..=max_retries {
        let rows = connection
            .select(&select, vec![SqlValue::Text(segment.to_string())])
            .await?;

        let Some(current) = rows.first().and_then(|row| row.first()) else {
            let insert = format!(
                "INSERT INTO {} ({}, {}) VALUES (?, ?)",
                ID_TABLE, ID_TABLE_SEGMENT, ID_TABLE_NEXT_VALUE
            );
            connection
                .execute(&insert, vec![SqlValue::Text(segment.to_string()), SqlValue::Integer(2)])
                .await?;
            return Ok(Identifier::Long(1));
        };

        let current = current.as_i64().ok_or_else(|| ReposeError::IdentifierGeneration {
            entity_name: entity_name.to_string(),
            message: format!("segment '{}' holds a non-integer value", segment),
        })?;

        let claimed = connection
            .execute(
                &update,
                vec![
                    SqlValue::Integer(current + 1),
                    SqlValue::Text(segment.to_string()),
                    SqlValue::Integer(current),
                ],
            )
            .await?;
        if claimed == 1 {
            return Ok(Identifier::Long(current));
        }
        tracing::debug!(segment, attempt, "id table update lost the race, retrying");
    }

    Err(ReposeError::IdentifierGeneration {
        entity_name: entity_name.to_string(),
        message: format!(
            "segment '{}' could not be advanced after {} retries",
            segment, max_retries
        ),
    })
}
