//! Credential resolution for S3 and Azure locations
//!
//! AWS precedence, first match wins:
//!
//! 1. `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` / `AWS_SESSION_TOKEN`, unless a
//!    profile was given explicitly with `s3Profile`
//! 2. the profile in the shared credentials file (`s3CredentialsFile`,
//!    `AWS_SHARED_CREDENTIALS_FILE`, `~/.aws/credentials`)
//! 3. the profile in the config file (`s3ConfigFile`, `AWS_CONFIG_FILE`, `~/.aws/config`)
//! 4. container credentials (`AWS_CONTAINER_CREDENTIALS_{RELATIVE,FULL}_URI`)
//! 5. instance metadata (`AWS_EC2_METADATA_*`)
//!
//! The environment is passed in as a lookup function so resolution is testable.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::location::StorageOptions;

/// Where a set of AWS credentials came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    Environment,
    SharedCredentialsFile(PathBuf),
    ConfigFile(PathBuf),
    Container,
    InstanceMetadata,
}

/// Static AWS keys
#[derive(Clone, PartialEq, Eq)]
pub struct AwsKeys {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for AwsKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsKeys")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Container credential endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEndpoint {
    pub relative_uri: Option<String>,
    pub full_uri: Option<String>,
    pub authorization_token: Option<String>,
}

/// Outcome of AWS credential resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsSettings {
    pub profile: String,
    pub region: String,
    pub source: CredentialSource,
    pub keys: Option<AwsKeys>,
    pub container: Option<ContainerEndpoint>,
    pub metadata_endpoint: Option<String>,
}

type IniSections = HashMap<String, HashMap<String, String>>;

/// Minimal INI reader for the AWS credentials and config files
fn parse_ini(text: &str) -> IniSections {
    let mut sections = IniSections::new();
    let mut current: Option<String> = None;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            let name = line[1..line.len() - 1].trim().to_string();
            sections.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }
        if let (Some(section), Some((key, value))) = (current.as_ref(), line.split_once('=')) {
            sections
                .entry(section.clone())
                .or_default()
                .insert(key.trim().to_lowercase(), value.trim().to_string());
        }
    }
    sections
}

fn read_ini(path: &Path) -> Result<Option<IniSections>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(parse_ini(&text))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(path.display().to_string(), e)),
    }
}

fn keys_from_section(section: &HashMap<String, String>) -> Option<AwsKeys> {
    Some(AwsKeys {
        access_key_id: section.get("aws_access_key_id")?.clone(),
        secret_access_key: section.get("aws_secret_access_key")?.clone(),
        session_token: section.get("aws_session_token").cloned(),
    })
}

fn home_file<F>(env: &F, relative: &str) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    env("HOME")
        .or_else(|| env("USERPROFILE"))
        .map(|home| PathBuf::from(home).join(relative))
}

/// Resolve AWS credentials and region with the documented precedence
pub fn resolve_aws<F>(options: &StorageOptions, env: F) -> Result<AwsSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let env_value = |key: &str| env(key).filter(|v| !v.is_empty());

    let profile = options
        .s3_profile
        .clone()
        .or_else(|| env_value("AWS_PROFILE"))
        .or_else(|| env_value("AWS_DEFAULT_PROFILE"))
        .unwrap_or_else(|| "default".to_string());

    let credentials_file = options
        .s3_credentials_file
        .clone()
        .map(PathBuf::from)
        .or_else(|| env_value("AWS_SHARED_CREDENTIALS_FILE").map(PathBuf::from))
        .or_else(|| home_file(&env_value, ".aws/credentials"));
    let config_file = options
        .s3_config_file
        .clone()
        .map(PathBuf::from)
        .or_else(|| env_value("AWS_CONFIG_FILE").map(PathBuf::from))
        .or_else(|| home_file(&env_value, ".aws/config"));

    let credentials_ini = match &credentials_file {
        Some(path) => read_ini(path)?,
        None => None,
    };
    let config_ini = match &config_file {
        Some(path) => read_ini(path)?,
        None => None,
    };

    // the config file names non-default profiles "[profile x]"
    let config_section = config_ini.as_ref().and_then(|ini| {
        if profile == "default" {
            ini.get("default")
        } else {
            ini.get(&format!("profile {}", profile))
                .or_else(|| ini.get(&profile))
        }
    });

    let region = options
        .s3_region
        .clone()
        .or_else(|| env_value("AWS_REGION"))
        .or_else(|| env_value("AWS_DEFAULT_REGION"))
        .or_else(|| config_section.and_then(|s| s.get("region").cloned()))
        .unwrap_or_else(|| "us-east-1".to_string());

    let mut settings = AwsSettings {
        profile: profile.clone(),
        region,
        source: CredentialSource::InstanceMetadata,
        keys: None,
        container: None,
        metadata_endpoint: None,
    };

    if options.s3_profile.is_none() {
        if let (Some(id), Some(secret)) = (
            env_value("AWS_ACCESS_KEY_ID"),
            env_value("AWS_SECRET_ACCESS_KEY"),
        ) {
            settings.source = CredentialSource::Environment;
            settings.keys = Some(AwsKeys {
                access_key_id: id,
                secret_access_key: secret,
                session_token: env_value("AWS_SESSION_TOKEN"),
            });
            return Ok(settings);
        }
    }

    if let (Some(path), Some(ini)) = (&credentials_file, &credentials_ini) {
        if let Some(keys) = ini.get(&profile).and_then(keys_from_section) {
            settings.source = CredentialSource::SharedCredentialsFile(path.clone());
            settings.keys = Some(keys);
            return Ok(settings);
        }
    }

    if let (Some(path), Some(section)) = (&config_file, config_section) {
        if let Some(keys) = keys_from_section(section) {
            settings.source = CredentialSource::ConfigFile(path.clone());
            settings.keys = Some(keys);
            return Ok(settings);
        }
    }

    if options.s3_profile.is_some()
        && credentials_ini.is_none()
        && config_ini.is_none()
    {
        return Err(Error::config(format!(
            "The AWS profile '{}' was requested but neither the credentials nor the config file exists",
            profile
        )));
    }

    let relative_uri = env_value("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI");
    let full_uri = env_value("AWS_CONTAINER_CREDENTIALS_FULL_URI");
    if relative_uri.is_some() || full_uri.is_some() {
        let authorization_token = match env_value("AWS_CONTAINER_AUTHORIZATION_TOKEN") {
            Some(token) => Some(token),
            None => match env_value("AWS_CONTAINER_AUTHORIZATION_TOKEN_FILE") {
                Some(path) => Some(
                    std::fs::read_to_string(&path)
                        .map_err(|e| Error::io(path.clone(), e))?
                        .trim()
                        .to_string(),
                ),
                None => None,
            },
        };
        settings.source = CredentialSource::Container;
        settings.container = Some(ContainerEndpoint {
            relative_uri,
            full_uri,
            authorization_token,
        });
        return Ok(settings);
    }

    let metadata_disabled = env_value("AWS_EC2_METADATA_DISABLED")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if metadata_disabled {
        return Err(Error::config(format!(
            "Could not find AWS credentials for profile '{}'",
            profile
        )));
    }
    settings.metadata_endpoint = env_value("AWS_EC2_METADATA_SERVICE_ENDPOINT");
    Ok(settings)
}

/// Azure Blob Storage account credentials
#[derive(Clone, PartialEq, Eq)]
pub struct AzureSettings {
    pub account: String,
    pub access_key: Option<String>,
    pub sas_token: Option<String>,
    pub endpoint: Option<String>,
}

impl std::fmt::Debug for AzureSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureSettings")
            .field("account", &self.account)
            .field("access_key", &self.access_key.as_ref().map(|_| "***"))
            .field("sas_token", &self.sas_token.as_ref().map(|_| "***"))
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Resolve Azure credentials from options, the connection string or the environment
pub fn resolve_azure<F>(options: &StorageOptions, env: F) -> Result<AzureSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let env_value = |key: &str| env(key).filter(|v| !v.is_empty());

    let mut settings = AzureSettings {
        account: String::new(),
        access_key: None,
        sas_token: None,
        endpoint: None,
    };

    if let Some(conn) = env_value("AZURE_STORAGE_CONNECTION_STRING") {
        for part in conn.split(';').filter(|p| !p.trim().is_empty()) {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            match key.trim() {
                "AccountName" => settings.account = value.trim().to_string(),
                "AccountKey" => settings.access_key = Some(value.trim().to_string()),
                "SharedAccessSignature" => settings.sas_token = Some(value.trim().to_string()),
                "BlobEndpoint" => settings.endpoint = Some(value.trim().to_string()),
                _ => {}
            }
        }
    } else {
        settings.account = env_value("AZURE_STORAGE_ACCOUNT").unwrap_or_default();
        settings.access_key = env_value("AZURE_STORAGE_KEY");
        settings.sas_token = env_value("AZURE_STORAGE_SAS_TOKEN");
    }

    if let Some(account) = &options.azure_storage_account {
        settings.account = account.clone();
    }
    if let Some(sas) = &options.azure_storage_sas_token {
        settings.sas_token = Some(sas.clone());
    }

    if settings.account.is_empty() {
        return Err(Error::config(
            "Azure storage account is not configured, set azureStorageAccount or AZURE_STORAGE_ACCOUNT",
        ));
    }
    if settings.access_key.is_none() && settings.sas_token.is_none() {
        return Err(Error::config(format!(
            "No key or SAS token available for Azure storage account '{}'",
            settings.account
        )));
    }
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn env_of(pairs: Vec<(&'static str, String)>) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<&'static str, String> = pairs.into_iter().collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_environment_keys_win() {
        let env = env_of(vec![
            ("AWS_ACCESS_KEY_ID", "AKIA".into()),
            ("AWS_SECRET_ACCESS_KEY", "secret".into()),
            ("AWS_REGION", "eu-west-1".into()),
            ("HOME", "/nonexistent".into()),
        ]);
        let settings = resolve_aws(&StorageOptions::default(), env).unwrap();
        assert_eq!(settings.source, CredentialSource::Environment);
        assert_eq!(settings.region, "eu-west-1");
        assert_eq!(settings.keys.unwrap().access_key_id, "AKIA");
    }

    #[test]
    fn test_profile_from_credentials_file_and_region_from_config() {
        let dir = TempDir::new().unwrap();
        let creds = dir.path().join("credentials");
        let config = dir.path().join("config");
        std::fs::write(
            &creds,
            "[default]\naws_access_key_id = D\naws_secret_access_key = DS\n\n[work]\naws_access_key_id = W\naws_secret_access_key = WS\n",
        )
        .unwrap();
        std::fs::write(&config, "[profile work]\nregion = ap-south-1\n").unwrap();

        let env = env_of(vec![
            ("AWS_SHARED_CREDENTIALS_FILE", creds.display().to_string()),
            ("AWS_CONFIG_FILE", config.display().to_string()),
            ("AWS_PROFILE", "work".into()),
        ]);
        let settings = resolve_aws(&StorageOptions::default(), env).unwrap();
        assert_eq!(settings.profile, "work");
        assert_eq!(settings.region, "ap-south-1");
        assert_eq!(settings.keys.unwrap().access_key_id, "W");
        assert_eq!(settings.source, CredentialSource::SharedCredentialsFile(creds));
    }

    #[test]
    fn test_explicit_profile_skips_environment_keys() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("config");
        std::fs::write(
            &config,
            "[profile ops]\naws_access_key_id = O\naws_secret_access_key = OS\n",
        )
        .unwrap();
        let options = StorageOptions {
            s3_profile: Some("ops".into()),
            s3_config_file: Some(config.display().to_string()),
            s3_credentials_file: Some(dir.path().join("missing").display().to_string()),
            ..Default::default()
        };
        let env = env_of(vec![
            ("AWS_ACCESS_KEY_ID", "AKIA".into()),
            ("AWS_SECRET_ACCESS_KEY", "secret".into()),
        ]);
        let settings = resolve_aws(&options, env).unwrap();
        assert_eq!(settings.keys.unwrap().access_key_id, "O");
        assert_eq!(settings.region, "us-east-1");
    }

    #[test]
    fn test_container_then_metadata() {
        let env = env_of(vec![
            ("HOME", "/nonexistent".into()),
            ("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI", "/v2/creds".into()),
            ("AWS_CONTAINER_AUTHORIZATION_TOKEN", "tok".into()),
        ]);
        let settings = resolve_aws(&StorageOptions::default(), env).unwrap();
        assert_eq!(settings.source, CredentialSource::Container);
        let container = settings.container.unwrap();
        assert_eq!(container.relative_uri.as_deref(), Some("/v2/creds"));
        assert_eq!(container.authorization_token.as_deref(), Some("tok"));

        let env = env_of(vec![("HOME", "/nonexistent".into())]);
        let settings = resolve_aws(&StorageOptions::default(), env).unwrap();
        assert_eq!(settings.source, CredentialSource::InstanceMetadata);

        let env = env_of(vec![
            ("HOME", "/nonexistent".into()),
            ("AWS_EC2_METADATA_DISABLED", "true".into()),
        ]);
        assert!(resolve_aws(&StorageOptions::default(), env).is_err());
    }

    #[test]
    fn test_azure_connection_string() {
        let env = env_of(vec![(
            "AZURE_STORAGE_CONNECTION_STRING",
            "DefaultEndpointsProtocol=https;AccountName=acc;AccountKey=a2V5;EndpointSuffix=core.windows.net".into(),
        )]);
        let settings = resolve_azure(&StorageOptions::default(), env).unwrap();
        assert_eq!(settings.account, "acc");
        assert_eq!(settings.access_key.as_deref(), Some("a2V5"));
    }

    #[test]
    fn test_azure_account_and_sas() {
        let env = env_of(vec![
            ("AZURE_STORAGE_ACCOUNT", "acc".into()),
            ("AZURE_STORAGE_SAS_TOKEN", "sv=2022".into()),
        ]);
        let settings = resolve_azure(&StorageOptions::default(), env).unwrap();
        assert_eq!(settings.sas_token.as_deref(), Some("sv=2022"));

        let env = env_of(vec![("AZURE_STORAGE_ACCOUNT", "acc".into())]);
        assert!(resolve_azure(&StorageOptions::default(), env).is_err());
    }
}
