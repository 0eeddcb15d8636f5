use serde::{Deserialize, Serialize};

/// Key of a stock lease.
///
/// Rendered as `item|warehouse` or `item|warehouse|batch`; multi-key acquisition
/// orders keys by this rendering. `|` and `\` inside a code are escaped with
/// `\`, so distinct keys never render alike.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockKey {
    pub item_code: String,
    pub warehouse_code: String,
    pub batch_number: Option<String>,
}

impl LockKey {
    /// Key covering an item in a warehouse.
    pub fn item(item_code: impl Into<String>, warehouse_code: impl Into<String>) -> Self {
        Self {
            item_code: item_code.into(),
            warehouse_code: warehouse_code.into(),
            batch_number: None,
        }
    }

    /// Key covering one batch of an item in a warehouse.
    pub fn batch(
        item_code: impl Into<String>,
        warehouse_code: impl Into<String>,
        batch_number: impl Into<String>,
    ) -> Self {
        Self {
            item_code: item_code.into(),
            warehouse_code: warehouse_code.into(),
            batch_number: Some(batch_number.into()),
        }
    }
}

impl core::fmt::Display for LockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write_code(f, &self.item_code)?;
        f.write_str("|")?;
        write_code(f, &self.warehouse_code)?;
        if let Some(batch) = &self.batch_number {
            f.write_str("|")?;
            write_code(f, batch)?;
        }
        Ok(())
    }
}

fn write_code(f: &mut core::fmt::Formatter<'_>, code: &str) -> core::fmt::Result {
    for c in code.chars() {
        if matches!(c, '|' | '\\') {
            f.write_str("\\")?;
        }
        write!(f, "{c}")?;
    }
    Ok(())
}
