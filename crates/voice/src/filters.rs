//! Speaker filters shared by every voice mode.

use {
    switchboard_channels::gating,
    switchboard_common::types::{RoleRef, User},
    switchboard_protocol::UserFilters,
};

/// Whether `user` (holding `roles`) passes a voice trigger's user filters.
pub fn user_passes(filters: &UserFilters, user: &User, roles: &[RoleRef]) -> bool {
    if filters.ignore_bots && user.bot {
        return false;
    }
    let user_ids = filters.user_id_list();
    if !user_ids.is_empty() && !user_ids.contains(&user.id.as_str()) {
        return false;
    }
    gating::any_allowed(roles.iter().map(|r| r.id.as_str()), &filters.role_ids)
}
