//! Role to query type resolution.

use crate::error::GatewayError;
use crate::models::QueryType;

pub const ROLE_OBFUSCATED_PER_SITE: &str = "MEDCO_OBFUSCATED_PER_SITE";
pub const ROLE_AGGREGATED_PER_SITE: &str = "MEDCO_AGGREGATED_PER_SITE";
pub const ROLE_AGGREGATED_TOTAL: &str = "MEDCO_AGGREGATED_TOTAL";

/// Checked in order; the most detailed granted mode wins.
const ROLE_PRECEDENCE: [(&str, QueryType); 3] = [
    (ROLE_OBFUSCATED_PER_SITE, QueryType::ObfuscatedPerSite),
    (ROLE_AGGREGATED_PER_SITE, QueryType::AggregatedPerSite),
    (ROLE_AGGREGATED_TOTAL, QueryType::AggregatedTotal),
];

/// Pick the query type a user may run from their roles.
pub fn resolve_query_type(roles: &[String]) -> Result<QueryType, GatewayError> {
    ROLE_PRECEDENCE
        .iter()
        .find(|(role, _)| roles.iter().any(|r| r == role))
        .map(|(_, query_type)| *query_type)
        .ok_or_else(|| GatewayError::Authorization {
            roles: roles.to_vec(),
        })
}
