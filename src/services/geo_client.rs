use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::raster::{RasterMetadata, VectorMetadata};
use crate::services::geo::{
    GeoBackend, GeoError, MaskRequest, MergeRequest, ReprojectRequest, ResampleRequest,
    VectorReprojectRequest,
};

/// Client for the geoprocessing sidecar (a GDAL worker exposing JSON endpoints).
pub struct GeoServiceClient {
    http: Client,
    base_url: String,
}

#[derive(Serialize)]
struct PathRequest<'a> {
    path: &'a str,
}

#[derive(Serialize)]
struct CrsPair<'a> {
    a: &'a str,
    b: &'a str,
}

#[derive(Deserialize)]
struct OutputResponse {
    output_path: String,
}

#[derive(Deserialize)]
struct EquivalenceResponse {
    equivalent: bool,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    kind: String,
    message: String,
    #[serde(default)]
    path: Option<String>,
}

impl GeoServiceClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, GeoError> {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| GeoError::Unavailable(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn call<B, R>(&self, endpoint: &str, body: &B) -> Result<R, GeoError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned + Send,
    {
        let url = format!("{}/v1/{}", self.base_url, endpoint);

        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| GeoError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<R>()
                .await
                .map_err(|e| GeoError::Processing(format!("malformed response from {endpoint}: {e}")));
        }

        let text = response.text().await.unwrap_or_default();
        Err(decode_error(status, &text))
    }
}

fn decode_error(status: StatusCode, body: &str) -> GeoError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(ErrorEnvelope { error }) => {
            let path = error.path.unwrap_or_default();
            match error.kind.as_str() {
                "not_found" => GeoError::NotFound(if path.is_empty() { error.message } else { path }),
                "invalid_format" => GeoError::InvalidFormat {
                    path,
                    reason: error.message,
                },
                _ => GeoError::Processing(error.message),
            }
        }
        Err(_) if status.is_server_error() => {
            GeoError::Unavailable(format!("{status}: {body}"))
        }
        Err(_) => GeoError::Processing(format!("{status}: {body}")),
    }
}

#[async_trait]
impl GeoBackend for GeoServiceClient {
    async fn raster_metadata(&self, path: &str) -> Result<RasterMetadata, GeoError> {
        self.call("raster/metadata", &PathRequest { path }).await
    }

    async fn vector_metadata(&self, path: &str) -> Result<VectorMetadata, GeoError> {
        self.call("vector/metadata", &PathRequest { path }).await
    }

    async fn mask(&self, request: &MaskRequest) -> Result<String, GeoError> {
        let out: OutputResponse = self.call("raster/mask", request).await?;
        Ok(out.output_path)
    }

    async fn reproject_raster(&self, request: &ReprojectRequest) -> Result<String, GeoError> {
        let out: OutputResponse = self.call("raster/reproject", request).await?;
        Ok(out.output_path)
    }

    async fn reproject_vector(
        &self,
        request: &VectorReprojectRequest,
    ) -> Result<String, GeoError> {
        let out: OutputResponse = self.call("vector/reproject", request).await?;
        Ok(out.output_path)
    }

    async fn resample(&self, request: &ResampleRequest) -> Result<String, GeoError> {
        let out: OutputResponse = self.call("raster/resample", request).await?;
        Ok(out.output_path)
    }

    async fn merge(&self, request: &MergeRequest) -> Result<String, GeoError> {
        let out: OutputResponse = self.call("raster/merge", request).await?;
        Ok(out.output_path)
    }

    async fn crs_equivalent(&self, a: &str, b: &str) -> Result<bool, GeoError> {
        let out: EquivalenceResponse = self.call("crs/equivalent", &CrsPair { a, b }).await?;
        Ok(out.equivalent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_invalid_format() {
        let body = r#"{"error":{"kind":"invalid_format","message":"not a GeoTIFF","path":"a.tif"}}"#;
        match decode_error(StatusCode::UNPROCESSABLE_ENTITY, body) {
            GeoError::InvalidFormat { path, reason } => {
                assert_eq!(path, "a.tif");
                assert_eq!(reason, "not a GeoTIFF");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decode_processing_keeps_library_message() {
        let body = r#"{"error":{"kind":"processing","message":"Input shapes do not overlap raster"}}"#;
        assert!(matches!(
            decode_error(StatusCode::BAD_REQUEST, body),
            GeoError::Processing(m) if m == "Input shapes do not overlap raster"
        ));
    }

    #[test]
    fn test_decode_unstructured_server_error() {
        assert!(matches!(
            decode_error(StatusCode::BAD_GATEWAY, "upstream down"),
            GeoError::Unavailable(_)
        ));
    }
}
