//! Avatar lookups, batched and tolerant of vanished accounts.

use std::collections::BTreeMap;

use anyhow::Result;
use serde_json::Value;

use crate::github::{Forge, AVATAR_BATCH_SIZE};

use super::graphql_string;

/// Predictable image path for accounts the API no longer resolves.
pub fn fallback_avatar(login: &str) -> String {
    format!("https://github.com/{login}.png")
}

/// GraphQL aliases cannot carry dashes or dots.
fn alias_for(login: &str) -> String {
    format!("u_{}", login.replace(['-', '.'], "_"))
}

/// Avatar URL per login, [`AVATAR_BATCH_SIZE`] lookups to a request.
///
/// Deleted or renamed accounts error at the result level, so batches go
/// through the partial path and missing aliases fall back to the
/// github.com image URL instead of failing the run.
pub fn avatars(api: &dyn Forge, logins: &[String]) -> Result<BTreeMap<String, String>> {
    let mut avatars = BTreeMap::new();
    for (index, batch) in logins.chunks(AVATAR_BATCH_SIZE).enumerate() {
        if index > 0 {
            api.pace();
        }
        let mut doc = String::from("query {\n");
        for login in batch {
            doc.push_str(&format!(
                "  {}: user(login: {}) {{ avatarUrl }}\n",
                alias_for(login),
                graphql_string(login)
            ));
        }
        doc.push('}');
        let data = api.query_partial(&doc, &[])?;
        for login in batch {
            let url = data
                .get(alias_for(login))
                .and_then(|user| user.get("avatarUrl"))
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| fallback_avatar(login));
            avatars.insert(login.clone(), url);
        }
    }
    Ok(avatars)
}
