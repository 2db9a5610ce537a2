//! Route guards. Each method is bound to one guard, evaluated by the router
//! before the handler runs.

use crate::auth::Principal;

pub const LOGIN_PATH: &str = "/login/";
pub const ADMIN_LOGIN_PATH: &str = "/admin/login/";
pub const ADMIN_FORBIDDEN_MESSAGE: &str = "Admins are not allowed to access student pages.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    Public,
    Authenticated,
    AdminRequired,
    StudentRequired,
    /// Public while no workspace with a staff account is open, admin-only
    /// afterwards.
    Bootstrap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow(Option<Principal>),
    Redirect(&'static str),
    Forbidden(&'static str),
}

/// Resolves `Bootstrap` against the open workspace.
pub fn effective(guard: Guard, workspace_has_admin: bool) -> Guard {
    match guard {
        Guard::Bootstrap if workspace_has_admin => Guard::AdminRequired,
        Guard::Bootstrap => Guard::Public,
        g => g,
    }
}

pub fn evaluate(guard: Guard, principal: Option<Principal>) -> Verdict {
    match guard {
        Guard::Public => Verdict::Allow(principal),
        Guard::Authenticated => match principal {
            Some(p) => Verdict::Allow(Some(p)),
            None => Verdict::Redirect(LOGIN_PATH),
        },
        Guard::AdminRequired | Guard::Bootstrap => match principal {
            Some(p) if p.is_admin() => Verdict::Allow(Some(p)),
            _ => Verdict::Redirect(ADMIN_LOGIN_PATH),
        },
        Guard::StudentRequired => match principal {
            None => Verdict::Redirect(LOGIN_PATH),
            Some(p) if p.is_admin() => Verdict::Forbidden(ADMIN_FORBIDDEN_MESSAGE),
            Some(p) => Verdict::Allow(Some(p)),
        },
    }
}
