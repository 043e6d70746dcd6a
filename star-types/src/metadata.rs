//! Header metadata: a string-keyed map of scalar values, with typed,
//! multi-key-fallback accessors in the style of the FITS header parser this
//! pipeline reads containers with.

use std::collections::BTreeMap;

/// A container's header, flattened to string key/value pairs.
///
/// Kept as a plain string map (rather than a richer enum of value types)
/// because the container format itself only ever stores header cards as
/// text; callers ask for the type they expect via [`Metadata::get_str`],
/// [`Metadata::get_f64`], [`Metadata::get_i64`] or [`Metadata::get_bool`].
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Metadata {
    raw: BTreeMap<String, String>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(raw: BTreeMap<String, String>) -> Self {
        Self { raw }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.raw.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) {
        self.raw.remove(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.raw.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.raw.keys().map(String::as_str)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.raw.get(key).map(String::as_str)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.raw.get(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.raw.get(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.raw.get(key).and_then(|v| match v.trim().to_ascii_uppercase().as_str() {
            "T" | "TRUE" | "1" => Some(true),
            "F" | "FALSE" | "0" => Some(false),
            _ => None,
        })
    }

    /// Tries each candidate key in order, returning the first present value.
    /// Mirrors the multi-alias header lookup used when different
    /// acquisition software names the same physical quantity differently.
    pub fn get_str_any(&self, candidates: &[&str]) -> Option<&str> {
        candidates.iter().find_map(|k| self.get_str(k))
    }

    pub fn get_f64_any(&self, candidates: &[&str]) -> Option<f64> {
        candidates.iter().find_map(|k| self.get_f64(k))
    }

    /// Keys whose values are copied through a stage unchanged unless that
    /// stage explicitly overwrites them: WCS linear-transform and
    /// distortion terms.
    pub fn wcs_passthrough_keys(&self) -> Vec<String> {
        self.raw
            .keys()
            .filter(|k| {
                let k = k.as_str();
                k.starts_with("A_")
                    || k.starts_with("B_")
                    || k.starts_with("AP_")
                    || k.starts_with("BP_")
                    || k.ends_with("_ORDER")
                    || matches!(
                        k,
                        "CTYPE1" | "CTYPE2" | "CRPIX1" | "CRPIX2" | "CRVAL1" | "CRVAL2"
                            | "CD1_1" | "CD1_2" | "CD2_1" | "CD2_2"
                            | "PC1_1" | "PC1_2" | "PC2_1" | "PC2_2"
                            | "CDELT1" | "CDELT2" | "CUNIT1" | "CUNIT2"
                            | "LONPOLE" | "LATPOLE"
                    )
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_getters_parse_stored_strings() {
        let mut meta = Metadata::new();
        meta.set("EXPTIME", "60.0");
        meta.set("XBINNING", "2");
        meta.set("COMBINED", "T");
        assert_eq!(meta.get_f64("EXPTIME"), Some(60.0));
        assert_eq!(meta.get_i64("XBINNING"), Some(2));
        assert_eq!(meta.get_bool("COMBINED"), Some(true));
    }

    #[test]
    fn any_variant_tries_candidates_in_order() {
        let mut meta = Metadata::new();
        meta.set("IMAGETYP", "Light");
        assert_eq!(meta.get_str_any(&["FRAME", "IMAGETYP"]), Some("Light"));
    }

    #[test]
    fn wcs_passthrough_keys_include_distortion_terms() {
        let mut meta = Metadata::new();
        meta.set("CTYPE1", "RA---TAN-SIP");
        meta.set("A_0_2", "1.2e-5");
        meta.set("A_ORDER", "2");
        meta.set("OBJECT", "M42");
        let keys = meta.wcs_passthrough_keys();
        assert!(keys.contains(&"CTYPE1".to_string()));
        assert!(keys.contains(&"A_0_2".to_string()));
        assert!(keys.contains(&"A_ORDER".to_string()));
        assert!(!keys.contains(&"OBJECT".to_string()));
    }
}
