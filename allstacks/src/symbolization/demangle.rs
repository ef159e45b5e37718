use rustc_demangle::try_demangle;
use std::fmt::Write;

/// Demangle a Rust symbol name, without the trailing hash
///
/// Anything that is not a Rust mangled name (C, C++, already demangled) is
/// returned unchanged, as is a name whose demangling fails part way.
#[must_use]
pub fn demangle(name: &str) -> String {
    let Ok(demangled) = try_demangle(name) else {
        return name.to_string();
    };

    let mut out = String::with_capacity(name.len());
    if write!(out, "{demangled:#}").is_err() || out.is_empty() {
        return name.to_string();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_mangling() {
        assert_eq!(demangle("_ZN4testE"), "test");
        assert_eq!(demangle("_ZN3foo3barE"), "foo::bar");
    }

    #[test]
    fn test_hash_is_stripped() {
        assert_eq!(demangle("_ZN3foo3bar17h05af221e174051e9E"), "foo::bar");
    }

    #[test]
    fn test_v0_mangling() {
        assert_eq!(demangle("_RNvC6_123foo3bar"), "123foo::bar");
    }

    #[test]
    fn test_plain_names_unchanged() {
        for name in ["main", "memcpy", "foo::bar", "MyApp.foo()"] {
            assert_eq!(demangle(name), name);
            assert_eq!(demangle(&demangle(name)), name);
        }
    }

    #[test]
    fn test_cpp_names_unchanged() {
        let name = "_ZNSt6vectorIiSaIiEE9push_backERKi";
        assert_eq!(demangle(name), name);
    }

    #[test]
    fn test_malformed_names_unchanged() {
        for name in ["_ZN", "_ZN3fo", "_R", "_RNvC"] {
            assert_eq!(demangle(name), name);
        }
    }

    #[test]
    fn test_never_empty_for_non_empty_input() {
        for name in ["_ZN4testE", "x", "_ZN", "_RNvC6_123foo3bar", "???"] {
            assert!(!demangle(name).is_empty());
        }
        assert_eq!(demangle(""), "");
    }
}
