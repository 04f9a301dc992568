use serde::Deserialize;

/// Form body of the one-time setup page.
#[derive(Debug, Deserialize)]
pub struct SetupForm {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

/// Form body of the login page.
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

/// Form body for creating a user from the settings page.
#[derive(Debug, Deserialize)]
pub struct CreateUserForm {
    pub username: String,
    pub email: String,
    pub password: String,
    /// Checkbox: present ("on") when ticked, absent otherwise.
    #[serde(default)]
    pub is_admin: Option<String>,
}

impl CreateUserForm {
    pub fn wants_admin(&self) -> bool {
        self.is_admin.is_some()
    }
}

