use anyhow::Context;
use std::path::Path;

/// Used when no instructions file is configured.
pub const DEFAULT_INSTRUCTIONS: &str = "\
You are a helpful voice assistant with image generation, web search and document retrieval capabilities.
When users ask you to create, generate, draw, show, or make an image, use your generate_image tool.
When users ask about news, recent events or anything that may have changed recently, use your search_web tool.
When users ask about the owner's background, resume, projects or common questions, use your retrieve_file tool with the matching document.

Keep your responses concise and natural.
Never mention the technical details of how you generate images or find information.
After generating an image, briefly describe what you created.";

/// Loads the session instructions from `path`, or the built-in default.
pub fn load_instructions(path: Option<&Path>) -> anyhow::Result<String> {
    let Some(path) = path else {
        return Ok(DEFAULT_INSTRUCTIONS.to_string());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read instructions from {}", path.display()))?;
    let content = content.trim();
    if content.is_empty() {
        anyhow::bail!("Instructions file {} is empty", path.display());
    }
    Ok(content.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_instructions_mention_every_tool() {
        let instructions = load_instructions(None).unwrap();
        for tool in ["generate_image", "search_web", "retrieve_file"] {
            assert!(instructions.contains(tool), "missing {tool}");
        }
    }

    #[test]
    fn test_instructions_from_file() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "\nSpeak like a pirate.\n").unwrap();

        let instructions = load_instructions(Some(file.path())).unwrap();
        assert_eq!(instructions, "Speak like a pirate.");
    }

    #[test]
    fn test_empty_or_missing_file_is_an_error() {
        let file = NamedTempFile::new().unwrap();
        assert!(load_instructions(Some(file.path())).is_err());
        assert!(load_instructions(Some(Path::new("/nonexistent/instructions.md"))).is_err());
    }
}
