//! Line format of the users file: `<id>: <flag>\n`, flag `1` for unlocked.

use std::collections::HashMap;

use super::error::UserStoreError;

const SEPARATOR: &str = ": ";

/// Serialize every record, sorted by id so rewrites of an unchanged map are
/// byte-identical.
pub fn encode(records: &HashMap<String, bool>) -> String {
    let mut ids: Vec<_> = records.iter().collect();
    ids.sort_unstable_by(|a, b| a.0.cmp(b.0));

    let mut out = String::with_capacity(ids.len() * 28);
    for (id, unlocked) in ids {
        out.push_str(id);
        out.push_str(SEPARATOR);
        out.push(if *unlocked { '1' } else { '0' });
        out.push('\n');
    }
    out
}

/// Parse a users file. Any integer flag other than `1` reads as locked.
pub fn decode(text: &str) -> Result<HashMap<String, bool>, UserStoreError> {
    let mut records = HashMap::new();
    let text = text.trim();
    if text.is_empty() {
        return Ok(records);
    }

    for (index, line) in text.split('\n').enumerate() {
        let line_no = index + 1;
        let Some((id, flag)) = line.split_once(SEPARATOR) else {
            return Err(UserStoreError::corrupt(line_no, "missing `: ` separator"));
        };
        let flag: i64 = flag.parse().map_err(|_| {
            UserStoreError::corrupt(line_no, format!("flag `{flag}` is not an integer"))
        })?;
        records.insert(id.to_string(), flag == 1);
    }

    Ok(records)
}
