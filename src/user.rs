use std::fmt;

pub type UserId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Superadmin,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Superadmin => "superadmin",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct RoleEntry {
    pub user_id: UserId,
    pub role: Role,
}

/// The identity a command arrives with. The display name is captured once,
/// at the time of the call, and stored alongside anything the caller creates.
#[derive(Debug, Clone)]
pub struct Caller {
    pub id: UserId,
    pub display_name: String,
}

impl Caller {
    pub fn new(id: UserId, username: Option<&str>) -> Self {
        let display_name = match username {
            Some(name) => format!("@{name}"),
            None => id.to_string(),
        };

        Self { id, display_name }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_falls_back_to_id() {
        assert_eq!(Caller::new(42, Some("someone")).display_name, "@someone");
        assert_eq!(Caller::new(42, None).display_name, "42");
    }
}
