//! Helpers for note fields that hold comma-joined `account:externalId` entries,
//! e.g. `"chan-a:101,chan-b:7"`.

pub fn format_entry(account_id: &str, external_id: &str) -> String {
    format!("{}:{}", account_id, external_id)
}

/// Split an entry at its last colon so account ids may contain colons.
pub fn split_entry(entry: &str) -> Option<(&str, &str)> {
    let (account, external) = entry.rsplit_once(':')?;
    if account.is_empty() || external.is_empty() {
        return None;
    }
    Some((account, external))
}

pub fn parse(field: Option<&str>) -> Vec<String> {
    field
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn join(entries: &[String]) -> String {
    entries.join(",")
}

/// Field value after adding `entry`. Existing entries keep their order.
pub fn append(field: Option<&str>, entry: &str) -> String {
    let mut entries = parse(field);
    if !entries.iter().any(|e| e == entry) {
        entries.push(entry.to_string());
    }
    join(&entries)
}

pub fn remove(field: Option<&str>, entry: &str) -> String {
    let entries: Vec<String> = parse(field).into_iter().filter(|e| e != entry).collect();
    join(&entries)
}

/// External id recorded for `account_id`, if any.
pub fn find_for_account<'a>(entries: &'a [String], account_id: &str) -> Option<&'a str> {
    entries.iter().find_map(|e| match split_entry(e) {
        Some((account, external)) if account == account_id => Some(external),
        _ => None,
    })
}
