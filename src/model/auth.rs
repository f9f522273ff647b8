use serde::{Deserialize, Serialize};

/// Group-owner id granted cross-tenant visibility and exempted from the
/// object-level access check.
pub const SUPERUSER_GROUP_OWNER: i64 = 1;

/// Bit positions of the per-path role mask.
pub const MASK_METHOD_ORDER: [&str; 6] = ["get", "post", "patch", "put", "delete", "query"];

/// Read permission, used to gate notification fan-out.
pub const MASK_GET: u32 = 1;

/// One authorization grant: a route path plus the bit-set of methods the
/// principal may invoke on it (get=0, post=1, patch=2, put=3, delete=4,
/// query=5).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub path: String,
    pub mask: u32,
}

/// True when `mask` has the bit for the given lowercase method set.
pub fn mask_allows(mask: u32, method: &str) -> bool {
    MASK_METHOD_ORDER
        .iter()
        .position(|m| *m == method)
        .is_some_and(|idx| mask & (1 << idx) != 0)
}

/// An authenticated caller: identity plus the tenant scoping (group-owner
/// and group memberships) and per-path role grants used for every
/// authorization decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "groupOwner", default)]
    pub group_owner: i64,
    #[serde(default)]
    pub groups: Vec<i64>,
    #[serde(default)]
    pub roles: Vec<Role>,
}

impl Principal {
    /// The role entry for a resolved route, if granted.
    pub fn role_for(&self, path: &str) -> Option<&Role> {
        self.roles.iter().find(|role| role.path == path)
    }

    pub fn is_superuser(&self) -> bool {
        self.group_owner == SUPERUSER_GROUP_OWNER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_grants_only_the_set_bits() {
        // bit 0 = get only
        assert!(mask_allows(0b00001, "get"));
        assert!(!mask_allows(0b00001, "post"));
        assert!(!mask_allows(0b00001, "put"));
        assert!(!mask_allows(0b00001, "delete"));

        // full CRUD grant used by the seed admin
        assert!(mask_allows(31, "delete"));
        assert!(!mask_allows(31, "query"));
        assert!(mask_allows(63, "query"));
    }

    #[test]
    fn mask_rejects_unknown_methods() {
        assert!(!mask_allows(u32::MAX, "options"));
    }

    #[test]
    fn principal_role_lookup_is_by_exact_path() {
        let principal = Principal {
            roles: vec![Role {
                path: "/widgets".to_string(),
                mask: 1,
            }],
            ..Principal::default()
        };

        assert!(principal.role_for("/widgets").is_some());
        assert!(principal.role_for("/widgets/1").is_none());
    }
}
