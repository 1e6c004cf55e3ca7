//! Deterministic pool-relative VM naming.
//!
//! Every VM in a pool is addressed by a non-negative index. The index and
//! the globally unique resource name are two views of the same identity:
//! `vm_name` and `vm_index` form a bijection for any fixed pool name.

use crate::{Error, Result};

/// Storage account names are reused from the pool name, so pool names must
/// fit the account-name constraints.
pub const POOL_NAME_MIN_LENGTH: usize = 3;
pub const POOL_NAME_MAX_LENGTH: usize = 24;

/// Resource name for the VM at `index` in `pool`.
pub fn vm_name(pool: &str, index: u32) -> String {
    format!("{}-{}", pool, index)
}

/// Inverse of [`vm_name`]. Fails if `name` is not `{pool}-{index}`.
pub fn vm_index(pool: &str, name: &str) -> Result<u32> {
    let malformed = || Error::MalformedName {
        pool: pool.to_string(),
        name: name.to_string(),
    };
    let suffix = name
        .strip_prefix(pool)
        .and_then(|rest| rest.strip_prefix('-'))
        .ok_or_else(malformed)?;
    suffix.parse().map_err(|_| malformed())
}

/// Smallest non-negative index not present in `indices` (gap-filling), or
/// the count when the set is a contiguous prefix of 0..n.
pub fn next_available_index(indices: &[u32]) -> u32 {
    let mut taken = indices.to_vec();
    taken.sort_unstable();
    taken.dedup();

    let mut next = 0;
    for index in taken {
        if index != next {
            break;
        }
        next += 1;
    }
    next
}

/// Public network address of a VM, derived from its name and region.
pub fn vm_fqdn(vm_name: &str, location: &str) -> String {
    format!("{}.{}.cloudapp.azure.com", vm_name, location)
}

/// Validate that a pool name can double as a storage account name:
/// 3-24 characters, lowercase letters and digits only.
pub fn validate_pool_name(pool: &str) -> Result<()> {
    if pool.len() < POOL_NAME_MIN_LENGTH || pool.len() > POOL_NAME_MAX_LENGTH {
        return Err(Error::Config(format!(
            "pool name '{}' must be {}-{} characters",
            pool, POOL_NAME_MIN_LENGTH, POOL_NAME_MAX_LENGTH
        )));
    }
    if !pool
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    {
        return Err(Error::Config(format!(
            "pool name '{}' may only contain lowercase letters and digits",
            pool
        )));
    }
    Ok(())
}
