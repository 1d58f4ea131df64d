use super::pprofpb::Profile;
use anyhow::bail;

/// Checks that every table reference in the profile resolves, so the parser
/// can index without bounds checks failing.
pub fn validate_pprof_profile(profile: &Profile) -> anyhow::Result<()> {
    if let Some(elem) = profile.string_table.first() {
        if !elem.is_empty() {
            bail!("first string table element is expected to be empty");
        }
    }

    let string_table_len = profile.string_table.len() as i64;
    let in_strings = |idx: i64| idx >= 0 && (idx == 0 || idx < string_table_len);

    for (i, st) in profile.sample_type.iter().enumerate() {
        if !in_strings(st.r#type) || !in_strings(st.unit) {
            bail!("sample_type {} index out of bounds", i);
        }
    }

    for (i, mapping) in profile.mapping.iter().enumerate() {
        if mapping.id != (i + 1) as u64 {
            bail!("mapping id is not sequential");
        }

        if !in_strings(mapping.filename) {
            bail!("mapping filename index out of bounds");
        }

        if !in_strings(mapping.build_id) {
            bail!("mapping build_id index out of bounds");
        }
    }

    let functions_length = profile.function.len() as u64;
    for (i, function) in profile.function.iter().enumerate() {
        if function.id != (i + 1) as u64 {
            bail!("function id is not sequential");
        }

        if !in_strings(function.name) {
            bail!("function name index out of bounds");
        }

        if !in_strings(function.system_name) {
            bail!("function system_name index out of bounds");
        }

        if !in_strings(function.filename) {
            bail!("function filename index out of bounds");
        }
    }

    for (i, location) in profile.location.iter().enumerate() {
        if location.id != (i + 1) as u64 {
            bail!("location id is not sequential");
        }

        if location.mapping_id > profile.mapping.len() as u64 {
            bail!("location mapping_id index out of bounds");
        }

        for line in location.line.iter() {
            if line.function_id > functions_length {
                bail!("location function_id index out of bounds");
            }
        }
    }

    if profile.sample_type.is_empty() && !profile.sample.is_empty() {
        bail!("profile has samples but no sample_type");
    }

    for (i, sample) in profile.sample.iter().enumerate() {
        if sample.value.len() != profile.sample_type.len() {
            bail!(
                "sample {} has {} values, expected {}",
                i,
                sample.value.len(),
                profile.sample_type.len()
            );
        }

        for (j, location) in sample.location_id.iter().enumerate() {
            if *location == 0 {
                bail!(
                    "sample {} has location_id 0 at index {}. it must be non zero.",
                    i,
                    j
                );
            }

            if *location > profile.location.len() as u64 {
                bail!(
                    "sample {} has location_id {} at index {}. it must be less than {}.",
                    i,
                    location,
                    j,
                    profile.location.len()
                );
            }
        }

        for (j, label) in sample.label.iter().enumerate() {
            if label.key == 0 {
                bail!(
                    "sample {} has label key 0 at index {}. it must be non zero.",
                    i,
                    j
                );
            }

            if !in_strings(label.key) || !in_strings(label.str) {
                bail!(
                    "sample {} has label {}={} at index {}. it must be less than {}.",
                    i,
                    label.key,
                    label.str,
                    j,
                    string_table_len
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::pprofpb::{Sample, ValueType};

    fn strings() -> Vec<String> {
        vec!["".into(), "cpu".into(), "nanoseconds".into()]
    }

    #[test]
    fn test_valid_empty() {
        assert!(validate_pprof_profile(&Profile::default()).is_ok());
    }

    #[test]
    fn test_first_string_not_empty() {
        let p = Profile {
            string_table: vec!["x".into()],
            ..Default::default()
        };
        assert!(validate_pprof_profile(&p).is_err());
    }

    #[test]
    fn test_value_count_mismatch() {
        let p = Profile {
            sample_type: vec![ValueType { r#type: 1, unit: 2 }],
            sample: vec![Sample {
                location_id: vec![],
                value: vec![1, 2],
                label: vec![],
            }],
            string_table: strings(),
            ..Default::default()
        };
        let err = validate_pprof_profile(&p).unwrap_err();
        assert_eq!("sample 0 has 2 values, expected 1", err.to_string());
    }

    #[test]
    fn test_location_out_of_bounds() {
        let p = Profile {
            sample_type: vec![ValueType { r#type: 1, unit: 2 }],
            sample: vec![Sample {
                location_id: vec![3],
                value: vec![1],
                label: vec![],
            }],
            string_table: strings(),
            ..Default::default()
        };
        assert!(validate_pprof_profile(&p).is_err());
    }

    #[test]
    fn test_sample_type_out_of_bounds() {
        let p = Profile {
            sample_type: vec![ValueType { r#type: 9, unit: 2 }],
            string_table: strings(),
            ..Default::default()
        };
        assert!(validate_pprof_profile(&p).is_err());
    }
}
