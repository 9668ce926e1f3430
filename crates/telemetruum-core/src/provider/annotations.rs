//! Selection of `*.icos.eu/*` labels and annotations.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

static ICOS_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(.+).icos.eu/(.+)").expect("valid icos key pattern"));

/// Rewrites `<a>.icos.eu/<b>` to `icos.<a>.<b>`; `None` for other keys.
pub fn rewrite_key(key: &str) -> Option<String> {
    if !ICOS_KEY.is_match(key) {
        return None;
    }
    Some(ICOS_KEY.replace_all(key, "icos.$1.$2").into_owned())
}

/// Keeps the matching entries of `source` under their rewritten keys.
pub fn icos_annotations<'a, I>(source: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    source
        .into_iter()
        .filter_map(|(k, v)| rewrite_key(k).map(|k| (k, v.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_key() {
        assert_eq!(
            rewrite_key("app.icos.eu/component").as_deref(),
            Some("icos.app.component")
        );
        assert_eq!(
            rewrite_key("deploy.icos.eu/owner").as_deref(),
            Some("icos.deploy.owner")
        );
        assert_eq!(rewrite_key("app.kubernetes.io/name"), None);
        assert_eq!(rewrite_key("icos.eu/component"), None);
    }

    #[test]
    fn test_icos_annotations_filters() {
        let labels: BTreeMap<String, String> = [
            ("app.icos.eu/component", "db"),
            ("com.docker.compose.project", "stack"),
            ("app.icos.eu/tier", "backend"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let annotations = icos_annotations(&labels);

        assert_eq!(annotations.len(), 2);
        assert_eq!(annotations["icos.app.component"], "db");
        assert_eq!(annotations["icos.app.tier"], "backend");
    }
}
