//! Shared validation helpers.

/// Push an error if `value` is outside `[min, max]`.
pub(crate) fn validate_range(errors: &mut Vec<String>, name: &str, value: u64, min: u64, max: u64) {
    if value < min || value > max {
        errors.push(format!("{name} = {value} is out of range [{min}, {max}]"));
    }
}

/// Push an error if `value` does not start with one of `schemes`.
pub(crate) fn validate_scheme(errors: &mut Vec<String>, name: &str, value: &str, schemes: &[&str]) {
    let ok = schemes
        .iter()
        .any(|scheme| value.starts_with(&format!("{scheme}://")));
    if !ok {
        errors.push(format!(
            "{name} = {value:?} must start with one of {}",
            schemes
                .iter()
                .map(|s| format!("{s}://"))
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
}
