use crate::error::BetError;

/// Shortest input accepted for a prefix match.
pub const MIN_PREFIX_LEN: usize = 3;

/// Canonical form used to compare contestant names.
pub fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Pick the candidate whose name matches `input`.
///
/// A case-insensitive exact match wins outright; otherwise a case-insensitive prefix of at
/// least [`MIN_PREFIX_LEN`] characters is accepted. Several equally good matches are reported
/// as [`BetError::AmbiguousContestant`] instead of picking one.
pub fn match_contestant<'a, K>(
    input: &str,
    candidates: impl IntoIterator<Item = (K, &'a str)>,
) -> Result<K, BetError>
where
    K: Clone,
{
    let needle = normalize(input);
    let candidates: Vec<(K, &str)> = candidates.into_iter().collect();

    let exact: Vec<&(K, &str)> = candidates
        .iter()
        .filter(|(_, name)| normalize(name) == needle)
        .collect();
    if let Some(found) = single(input, &exact)? {
        return Ok(found);
    }

    if needle.chars().count() >= MIN_PREFIX_LEN {
        let prefixed: Vec<&(K, &str)> = candidates
            .iter()
            .filter(|(_, name)| normalize(name).starts_with(&needle))
            .collect();
        if let Some(found) = single(input, &prefixed)? {
            return Ok(found);
        }
    }

    Err(BetError::UnknownContestant {
        input: input.to_string(),
        valid: candidates
            .iter()
            .map(|(_, name)| name.to_string())
            .collect(),
    })
}

fn single<K: Clone>(input: &str, matches: &[&(K, &str)]) -> Result<Option<K>, BetError> {
    match matches {
        [] => Ok(None),
        [(key, _)] => Ok(Some(key.clone())),
        _ => Err(BetError::AmbiguousContestant {
            input: input.to_string(),
            candidates: matches.iter().map(|(_, name)| name.to_string()).collect(),
        }),
    }
}
