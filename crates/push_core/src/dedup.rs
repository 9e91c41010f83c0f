use std::collections::HashSet;

use crate::model::Request;

#[derive(Debug, Default)]
pub struct Deduplicated {
    /// Newest request per id, ordered by creation time descending.
    pub survivors: Vec<Request>,
    /// Older copies that lost to a newer request with the same id.
    pub obsolete: Vec<Request>,
}

/// Keeps the newest request per id. Ties keep load order.
pub fn deduplicate(mut requests: Vec<Request>) -> Deduplicated {
    requests.sort_by(|a, b| b.creation_time.cmp(&a.creation_time));

    let mut seen: HashSet<String> = HashSet::new();
    let mut result = Deduplicated::default();
    for request in requests {
        if seen.insert(request.id.clone()) {
            result.survivors.push(request);
        } else {
            result.obsolete.push(request);
        }
    }
    result
}
