// Path: crates/shmem/src/naming.rs
use molsift_types::config::MirrorConfig;

/// Segment tag of the blob-store mirror.
pub const BLOB_TAG: &str = "bs2";
/// Segment tag of the fingerprint bit-plane mirror.
pub const FINGERPRINT_TAG: &str = "fp";

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Derives the OS identifier of a table's header segment.
///
/// Every process pointed at the same `{instance, schema, table_id, tag}` computes
/// the same name without coordination.
pub fn segment_name(config: &MirrorConfig, table_id: u32, tag: &str) -> String {
    format!(
        "/{}.{}.{}.{}",
        sanitize(&config.instance),
        sanitize(&config.schema),
        table_id,
        sanitize(tag)
    )
}

/// Derives the OS identifier of one data region loaded at `age`.
pub fn region_name(segment: &str, region: usize, age: u64) -> String {
    format!("{}_{}_{}", segment, region, age)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_deterministic_and_sanitized() {
        let config = MirrorConfig {
            instance: "lab/1".into(),
            schema: "chem data".into(),
            ..MirrorConfig::default()
        };
        let seg = segment_name(&config, 12, BLOB_TAG);
        assert_eq!(seg, "/lab_1.chem_data.12.bs2");
        assert_eq!(seg, segment_name(&config.clone(), 12, BLOB_TAG));
        assert_eq!(region_name(&seg, 3, 7), "/lab_1.chem_data.12.bs2_3_7");
    }
}
