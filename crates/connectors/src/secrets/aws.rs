use crate::{
    error::SecretError,
    secrets::{SecretRecord, SecretStore},
};
use async_trait::async_trait;
use aws_sdk_secretsmanager::{
    Client,
    error::{ProvideErrorMetadata, SdkError},
    operation::get_secret_value::GetSecretValueError,
};
use tracing::debug;

/// Secrets backed by AWS Secrets Manager.
#[derive(Clone)]
pub struct AwsSecretStore {
    client: Client,
}

impl AwsSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_conf(conf: &aws_config::SdkConfig) -> Self {
        Self::new(Client::new(conf))
    }
}

#[async_trait]
impl SecretStore for AwsSecretStore {
    async fn fetch(&self, name: &str) -> Result<SecretRecord, SecretError> {
        debug!(secret = name, "fetching secret");
        let output = self
            .client
            .get_secret_value()
            .secret_id(name)
            .send()
            .await
            .map_err(|err| classify(name, err))?;

        if let Some(text) = output.secret_string() {
            return SecretRecord::from_json_str(name, text);
        }
        if let Some(blob) = output.secret_binary() {
            return SecretRecord::from_binary(name, blob.as_ref());
        }

        Err(SecretError::Malformed {
            name: name.to_string(),
            reason: "secret has neither a string nor a binary value".to_string(),
        })
    }
}

fn classify(name: &str, err: SdkError<GetSecretValueError>) -> SecretError {
    let err = err.into_service_error();
    let code = err.code().map(str::to_string);
    let message = err.message().map(str::to_string).unwrap_or_else(|| err.to_string());

    if err.is_resource_not_found_exception() {
        SecretError::NotFound(name.to_string())
    } else if err.is_decryption_failure() {
        SecretError::Decryption {
            name: name.to_string(),
            message,
        }
    } else {
        SecretError::Service {
            name: name.to_string(),
            code,
            message,
        }
    }
}
