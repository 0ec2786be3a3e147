//! Subscription tiers and the endpoint quota they grant.

use serde::{Deserialize, Serialize};

/// Endpoints every account gets without a paid subscription.
pub const FREE_ENDPOINTS: usize = 3;
/// Endpoints added by each purchased add-on.
pub const ENDPOINTS_PER_ADDON: usize = 5;

/// The owner's subscription tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Free,
    Pro {
        endpoint_addons: u32,
        active: bool,
    },
}

impl Plan {
    /// Maximum number of endpoints the owner may register.
    pub fn endpoint_limit(&self) -> usize {
        match self {
            Plan::Pro { endpoint_addons, active: true } => {
                FREE_ENDPOINTS + ENDPOINTS_PER_ADDON * (*endpoint_addons as usize)
            }
            _ => FREE_ENDPOINTS,
        }
    }

    pub fn can_add_endpoint(&self, current_count: usize) -> bool {
        current_count < self.endpoint_limit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_limits() {
        assert_eq!(Plan::Free.endpoint_limit(), 3);
        assert_eq!(Plan::Pro { endpoint_addons: 2, active: true }.endpoint_limit(), 13);
        // Lapsed subscriptions fall back to the free allowance
        assert_eq!(Plan::Pro { endpoint_addons: 2, active: false }.endpoint_limit(), 3);
    }

    #[test]
    fn test_can_add_endpoint() {
        assert!(Plan::Free.can_add_endpoint(2));
        assert!(!Plan::Free.can_add_endpoint(3));
    }
}
