//! Allow/deny forwarding policy.

use crate::models::FilterList;

/// Decide whether a notification from `source_package` should be forwarded.
///
/// Deny-list mode forwards everything except listed packages; allow-list mode
/// forwards only listed packages. An empty allow-list therefore forwards
/// nothing and an empty deny-list forwards everything.
pub fn should_forward(source_package: &str, filter: &FilterList) -> bool {
    let listed = filter.packages.contains(source_package);
    if filter.deny_list {
        !listed
    } else {
        listed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PACKAGES: [&str; 3] = ["com.example.chat", "org.mail", "net.bank"];
    const PROBES: [&str; 5] = [
        "com.example.chat",
        "org.mail",
        "com.other.app",
        "com.example",
        "",
    ];

    #[test]
    fn test_allow_list_forwards_only_members() {
        let filter = FilterList::allow(PACKAGES);
        for pkg in PROBES {
            assert_eq!(should_forward(pkg, &filter), PACKAGES.contains(&pkg), "{pkg}");
        }
    }

    #[test]
    fn test_deny_list_forwards_non_members() {
        let filter = FilterList::deny(PACKAGES);
        for pkg in PROBES {
            assert_eq!(should_forward(pkg, &filter), !PACKAGES.contains(&pkg), "{pkg}");
        }
    }

    #[test]
    fn test_empty_allow_list_forwards_nothing() {
        let filter = FilterList::default();
        assert!(!should_forward("com.example.chat", &filter));
    }

    #[test]
    fn test_empty_deny_list_forwards_everything() {
        let filter = FilterList::deny(Vec::<String>::new());
        assert!(should_forward("com.example.chat", &filter));
        assert!(should_forward("anything", &filter));
    }

    #[test]
    fn test_membership_is_exact_match() {
        let filter = FilterList::allow(["com.example.*"]);
        assert!(!should_forward("com.example.chat", &filter));
        assert!(should_forward("com.example.*", &filter));

        let filter = FilterList::allow(["com.Example.Chat"]);
        assert!(!should_forward("com.example.chat", &filter));
    }
}
