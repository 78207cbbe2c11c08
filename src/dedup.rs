use std::collections::HashSet;

use crate::record::{CanonicalRecord, ResultSet};

/// Drop repeated links, then repeated titles, keeping the first occurrence
/// each time. Both passes always run, so records with an empty link collapse
/// to the first of them before titles are compared.
pub fn dedup(records: Vec<CanonicalRecord>) -> ResultSet {
    let by_link = keep_first(records, |r| r.link.as_str());
    ResultSet::new(keep_first(by_link, |r| r.title.as_str()))
}

fn keep_first<F>(records: Vec<CanonicalRecord>, key: F) -> Vec<CanonicalRecord>
where
    F: Fn(&CanonicalRecord) -> &str,
{
    let mut seen: HashSet<String> = HashSet::with_capacity(records.len());
    records
        .into_iter()
        .filter(|r| seen.insert(key(r).to_string()))
        .collect()
}
