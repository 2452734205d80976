use super::{DeviceToken, Directory, DirectoryUser, NumberMapping};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;
use urlencoding;

/// Directory backed by a REST service in front of the relational store.
///
/// Expected routes, relative to `url`:
/// `GET numbers/{number}`, `GET users?email=`, `GET users/{id}`,
/// `GET devices?identity=`, `POST devices`, `DELETE devices?identity=&token=`.
/// A 404 on a lookup means "no such row".
pub struct HttpDirectory {
    url: String,
    headers: HashMap<String, String>,
    client: Client,
}

impl HttpDirectory {
    pub fn new(url: &str, headers: HashMap<String, String>, timeout_ms: Option<u64>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms.unwrap_or(5000)))
            .user_agent(crate::version::get_useragent())
            .build()?;
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            headers,
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.url, path)
    }

    fn with_headers(&self, mut request: RequestBuilder) -> RequestBuilder {
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }
        request
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        self.with_headers(request)
            .send()
            .await
            .map_err(|e| anyhow!("directory request error: {}", e))
    }

    async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let response = self.send(self.client.get(self.endpoint(path))).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json::<T>().await?)),
            status => Err(anyhow!("directory returned {} for {}", status, path)),
        }
    }
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn number_mapping(&self, number: &str) -> Result<Option<NumberMapping>> {
        self.get_optional(&format!("numbers/{}", urlencoding::encode(number)))
            .await
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<DirectoryUser>> {
        self.get_optional(&format!("users?email={}", urlencoding::encode(email)))
            .await
    }

    async fn user_by_id(&self, id: i64) -> Result<Option<DirectoryUser>> {
        self.get_optional(&format!("users/{}", id)).await
    }

    async fn device_tokens(&self, identity: &str) -> Result<Vec<DeviceToken>> {
        Ok(self
            .get_optional::<Vec<DeviceToken>>(&format!(
                "devices?identity={}",
                urlencoding::encode(identity)
            ))
            .await?
            .unwrap_or_default())
    }

    async fn register_device_token(&self, token: DeviceToken) -> Result<()> {
        let response = self
            .send(self.client.post(self.endpoint("devices")).json(&token))
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "directory rejected device registration: {}",
                response.status()
            ));
        }
        Ok(())
    }

    async fn remove_device_token(&self, identity: &str, token: &str) -> Result<()> {
        let path = format!(
            "devices?identity={}&token={}",
            urlencoding::encode(identity),
            urlencoding::encode(token)
        );
        let response = self.send(self.client.delete(self.endpoint(&path))).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            status => Err(anyhow!("directory failed to remove device token: {}", status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_directory_creation() {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer abc".to_string());
        let directory =
            HttpDirectory::new("http://directory.local/api/", headers.clone(), None).unwrap();
        assert_eq!(directory.url, "http://directory.local/api");
        assert_eq!(
            directory.endpoint("users/1"),
            "http://directory.local/api/users/1"
        );
        assert_eq!(directory.headers, headers);
    }

    #[tokio::test]
    async fn test_http_directory_unreachable_is_error() {
        // nothing listens on port 9 of localhost
        let directory = HttpDirectory::new("http://127.0.0.1:9", HashMap::new(), Some(500)).unwrap();
        assert!(directory.number_mapping("+15550100").await.is_err());
        assert!(directory.user_by_id(1).await.is_err());
    }
}
