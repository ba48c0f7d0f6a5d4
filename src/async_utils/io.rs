//! I/O utilities.
//!
//! Reading small JSON or TOML configuration files, and writing output to
//! either a file or standard output.

use tokio::{
    fs::File,
    io::{AsyncWrite, AsyncWriteExt as _},
};

use crate::prelude::*;

/// Read TOML or JSON from a file. Files ending in `.json` are parsed as
/// JSON; anything else is parsed as TOML.
pub async fn read_json_or_toml<T>(path: &Path) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let data = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read file at path: {:?}", path))?;
    let is_json = path.extension().is_some_and(|ext| ext == "json");
    if is_json {
        serde_json::from_str(&data).with_context(|| {
            format!("Failed to parse JSON from file at path: {:?}", path)
        })
    } else {
        toml::from_str(&data).with_context(|| {
            format!("Failed to parse TOML from file at path: {:?}", path)
        })
    }
}

/// Create an [`AsyncWrite`] for a file or stdout.
pub async fn create_writer(
    path: Option<&Path>,
) -> Result<Box<dyn AsyncWrite + Unpin + Send + Sync + 'static>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .await
                .with_context(|| format!("Failed to create file at path: {:?}", path))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdout())),
    }
}

/// Write a value as pretty-printed JSON to either standard output or a file.
pub async fn write_json_pretty<T>(path: Option<&Path>, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    let mut wtr = create_writer(path).await?;
    let mut json =
        serde_json::to_string_pretty(value).context("Failed to serialize JSON")?;
    json.push('\n');
    wtr.write_all(json.as_bytes())
        .await
        .context("Failed to write JSON to output")?;
    wtr.flush().await.context("Failed to flush output")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        name: String,
    }

    #[tokio::test]
    async fn reads_toml_and_json_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join("sample.toml");
        let json_path = dir.path().join("sample.json");
        tokio::fs::write(&toml_path, "name = \"toml\"\n").await.unwrap();
        tokio::fs::write(&json_path, r#"{"name": "json"}"#).await.unwrap();

        let from_toml: Sample = read_json_or_toml(&toml_path).await.unwrap();
        let from_json: Sample = read_json_or_toml(&json_path).await.unwrap();
        assert_eq!(from_toml.name, "toml");
        assert_eq!(from_json.name, "json");
    }

    #[tokio::test]
    async fn writes_pretty_json_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        write_json_pretty(Some(&path), &json!({ "a": 1 })).await.unwrap();
        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(written, "{\n  \"a\": 1\n}\n");
    }
}
