//! Small helpers for crossing the C string boundary and for filesystem odds
//! and ends shared by the tests.

use std::ffi::CStr;
use std::os::raw::c_char;
use std::path::PathBuf;

use clap_sys::version::clap_version;

use crate::error::{Result, ValidatorError};

/// Converts a C string pointer to an owned `String`. Null pointers are a
/// contract violation for required descriptor fields, so the field name is
/// carried in the error.
///
/// # Safety
///
/// `ptr` must be null or point to a null-terminated string that stays alive
/// for the duration of the call.
pub unsafe fn cstr_to_string(ptr: *const c_char, field: &'static str) -> Result<String> {
    if ptr.is_null() {
        return Err(ValidatorError::NullDescriptorField(field));
    }
    Ok(CStr::from_ptr(ptr).to_string_lossy().into_owned())
}

/// Converts a C string pointer to `Some(String)`, mapping both null pointers
/// and empty strings to `None`.
///
/// # Safety
///
/// Same requirements as [`cstr_to_string`].
pub unsafe fn cstr_to_optional_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let string = CStr::from_ptr(ptr).to_string_lossy();
    if string.is_empty() {
        None
    } else {
        Some(string.into_owned())
    }
}

/// Converts a null-terminated array of C strings (like a descriptor's feature
/// list) to a vector. A null array yields an empty vector.
///
/// # Safety
///
/// `array` must be null or point to a null-terminated array of valid C string
/// pointers.
pub unsafe fn cstr_array_to_vec(array: *const *const c_char) -> Vec<String> {
    let mut result = Vec::new();
    if array.is_null() {
        return result;
    }

    let mut cursor = array;
    while !(*cursor).is_null() {
        result.push(CStr::from_ptr(*cursor).to_string_lossy().into_owned());
        cursor = cursor.add(1);
    }

    result
}

/// The directory used for scratch artifacts produced during validation.
pub fn validator_temp_dir() -> PathBuf {
    std::env::temp_dir().join("clap-validator")
}

/// CLAP's version compatibility rule. Everything from the 1.0.0 release
/// onwards is expected to interoperate; 0.x development versions are not.
pub fn is_version_compatible(version: clap_version) -> bool {
    version.major >= 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::ptr;

    #[test]
    fn test_cstr_to_string_null_is_error() {
        let result = unsafe { cstr_to_string(ptr::null(), "id") };
        assert!(result.is_err());
    }

    #[test]
    fn test_cstr_to_string_roundtrip() {
        let owned = CString::new("com.example.plugin").unwrap();
        let result = unsafe { cstr_to_string(owned.as_ptr(), "id") }.unwrap();
        assert_eq!(result, "com.example.plugin");
    }

    #[test]
    fn test_cstr_to_optional_string_empty_is_none() {
        let empty = CString::new("").unwrap();
        assert_eq!(unsafe { cstr_to_optional_string(empty.as_ptr()) }, None);
        assert_eq!(unsafe { cstr_to_optional_string(ptr::null()) }, None);

        let vendor = CString::new("Example Audio").unwrap();
        assert_eq!(
            unsafe { cstr_to_optional_string(vendor.as_ptr()) },
            Some("Example Audio".to_string())
        );
    }

    #[test]
    fn test_cstr_array_to_vec() {
        let first = CString::new("audio-effect").unwrap();
        let second = CString::new("stereo").unwrap();
        let array = [first.as_ptr(), second.as_ptr(), ptr::null()];

        let features = unsafe { cstr_array_to_vec(array.as_ptr()) };
        assert_eq!(features, vec!["audio-effect", "stereo"]);

        assert!(unsafe { cstr_array_to_vec(ptr::null()) }.is_empty());
    }

    #[test]
    fn test_validator_temp_dir_has_suffix() {
        let dir = validator_temp_dir();
        assert!(dir.ends_with("clap-validator"));
    }

    #[test]
    fn test_version_compatibility() {
        let compatible = clap_version {
            major: 1,
            minor: 2,
            revision: 0,
        };
        let incompatible = clap_version {
            major: 0,
            minor: 26,
            revision: 0,
        };
        assert!(is_version_compatible(compatible));
        assert!(!is_version_compatible(incompatible));
    }
}
