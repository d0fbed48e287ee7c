use anyhow::Result;
use serde::Serialize;

pub fn to_pretty<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

pub fn format_candidates(query: &str, ids: &[String]) -> Result<String> {
    #[derive(Serialize)]
    struct Candidates<'a> {
        query: &'a str,
        total: usize,
        ids: &'a [String],
    }

    to_pretty(&Candidates {
        query,
        total: ids.len(),
        ids,
    })
}
