use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use crate::core::{Result, SessionContext};
use super::HttpDirectoryClient;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoginResponse {
    #[serde(alias = "accessToken")]
    pub access_token: String,
    #[serde(alias = "tokenType", default = "default_token_type")]
    pub token_type: String,
    pub user: UserInfo,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegisterResponse {
    pub message: String,
    pub user: UserInfo,
}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

impl HttpDirectoryClient {
    /// `POST /auth/login`
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse> {
        let request = self.client
            .post(self.url("/auth/login"))
            .json(&Credentials { email, password });

        let response = Self::send(request).await?;
        let response = Self::check_status(response, "/auth/login").await?;

        Ok(response.json().await?)
    }

    /// `POST /auth/register`
    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<RegisterResponse> {
        let request = self.client
            .post(self.url("/auth/register"))
            .json(&json!({ "name": name, "email": email, "password": password }));

        let response = Self::send(request).await?;
        let response = Self::check_status(response, "/auth/register").await?;

        Ok(response.json().await?)
    }

    /// Log in and store the issued token in `session`.
    ///
    /// The typed email is kept rather than the one echoed by the service, a
    /// missing display name falls back to `"User"`.
    pub async fn login_session(
        &self,
        session: &SessionContext,
        email: &str,
        password: &str,
    ) -> Result<LoginResponse> {
        let response = self.login(email, password).await?;
        let user_name = response.user.name.clone().unwrap_or_else(|| "User".to_string());

        session.init(&response.access_token, user_name, email).await?;
        info!(user_email = %email, "logged in");

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_response_snake_and_camel() {
        let snake = r#"{"access_token": "mock_jwt_token", "token_type": "bearer",
                        "user": {"id": "1", "email": "a@x.com", "name": "Test User"}}"#;
        let camel = r#"{"accessToken": "mock_jwt_token", "tokenType": "bearer",
                        "user": {"id": "1", "email": "a@x.com", "name": "Test User"}}"#;

        let snake: LoginResponse = serde_json::from_str(snake).unwrap();
        let camel: LoginResponse = serde_json::from_str(camel).unwrap();
        assert_eq!(snake, camel);
        assert_eq!(snake.access_token, "mock_jwt_token");
    }

    #[test]
    fn test_register_response_without_name() {
        let body = r#"{"message": "User registered successfully",
                       "user": {"id": "2", "email": "b@x.com"}}"#;

        let response: RegisterResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.user.name, None);
    }
}
