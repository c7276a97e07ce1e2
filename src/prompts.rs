use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

pub const SCENE_COUNT: usize = 4;
pub const MIN_BRIEF_WORDS: usize = 15;

static PROMPT_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[\s#>*_]*PROMPT\s*([1-4])\s*[:.\-]?[\s*_]*").expect("static regex")
});

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenePrompts {
    pub prompt_1: String,
    pub prompt_2: String,
    pub prompt_3: String,
    pub prompt_4: String,
}

impl ScenePrompts {
    pub fn from_vec(mut items: Vec<String>) -> Self {
        items.resize(SCENE_COUNT, String::new());
        let mut it = items.into_iter();
        Self {
            prompt_1: it.next().unwrap_or_default(),
            prompt_2: it.next().unwrap_or_default(),
            prompt_3: it.next().unwrap_or_default(),
            prompt_4: it.next().unwrap_or_default(),
        }
    }

    pub fn as_array(&self) -> [&str; SCENE_COUNT] {
        [
            &self.prompt_1,
            &self.prompt_2,
            &self.prompt_3,
            &self.prompt_4,
        ]
    }

    /// Splits the model's reply on its `PROMPT n:` labels.
    ///
    /// Replies without all four labels fall back to blank-line paragraphs,
    /// and any scene still missing gets a placeholder.
    pub fn parse(response: &str) -> Self {
        let text = response.trim();

        let labels: Vec<(usize, usize, usize)> = PROMPT_LABEL
            .captures_iter(text)
            .filter_map(|cap| {
                let whole = cap.get(0)?;
                let n = cap[1].parse::<usize>().ok()?;
                Some((n, whole.start(), whole.end()))
            })
            .collect();

        let mut slots: Vec<Option<String>> = vec![None; SCENE_COUNT];
        for (idx, (n, _, body_start)) in labels.iter().enumerate() {
            let body_end = labels.get(idx + 1).map(|l| l.1).unwrap_or(text.len());
            let body = text[*body_start..body_end].trim();
            let slot = &mut slots[n - 1];
            if slot.is_none() && !body.is_empty() {
                *slot = Some(body.to_string());
            }
        }

        if slots.iter().all(Option::is_some) {
            return Self::from_vec(slots.into_iter().flatten().collect());
        }

        let paragraphs: Vec<&str> = text
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();

        let items = (0..SCENE_COUNT)
            .map(|i| match paragraphs.get(i) {
                Some(p) => p.to_string(),
                None => format!("Scene {} prompt not generated", i + 1),
            })
            .collect();
        Self::from_vec(items)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write prompts: {}", path.display()))?;
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompts: {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| "Failed to parse prompts JSON")
    }

    pub fn total_chars(&self) -> usize {
        self.as_array().iter().map(|p| p.len()).sum()
    }
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

pub fn validate_brief(brief: &str) -> Result<()> {
    let words = word_count(brief);
    if words == 0 {
        anyhow::bail!("business description is empty");
    }
    if words < MIN_BRIEF_WORDS {
        anyhow::bail!(
            "business description too short: {} words (need at least {})",
            words,
            MIN_BRIEF_WORDS
        );
    }
    Ok(())
}

pub fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}

pub fn build_request_text(brief: &str) -> String {
    format!(
        "You are an expert video production assistant specializing in creating detailed, professional video scene prompts for AI video generation.\n\n\
USER INPUT/COMPANY DESCRIPTION:\n{brief}\n\n\
Your Task: Analyze the user's company/business information and script, then create 4 DIFFERENT but INTERCONNECTED video scene prompts that together form a single, cohesive video narrative for this specific business, niche, or creative context.\n\n\
Instructions:\n\
1. Read and understand the company type, industry, niche, and the user's script/message.\n\
2. Decide which 4 scenes would be most effective and logical for this specific case.\n\
3. For each scene, open with a 1-2 sentence summary of the previous scene(s) and the overall video goal, so every prompt is self-contained.\n\
4. Do NOT use scene numbers or refer to \"scene 2\" or \"scene 3\" inside a prompt; use natural language transitions instead.\n\
5. Link the scenes so the ending of one leads naturally into the next.\n\
6. Keep a consistent visual and narrative style across all prompts.\n\n\
For each prompt, provide:\n\
- Detailed setting/environment description\n\
- Presenter/character details (appearance, clothing, demeanor)\n\
- Lighting setup and visual style\n\
- Camera movements and angles\n\
- Natural integration of the user's script/message\n\
- Duration: 8 seconds per scene\n\
- Photorealistic with natural micro-movements (gentle hand gestures, slight head tilts)\n\
- Steady camera with light cinematic push-in movement\n\
- Continuous, natural shots without fast motion\n\
- No background music or fade-ins\n\n\
Label each prompt exactly as:\n\
PROMPT 1: [scene]\n\
PROMPT 2: [scene]\n\
PROMPT 3: [scene]\n\
PROMPT 4: [scene]\n",
        brief = brief.trim()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_labelled_reply() {
        let reply = "Here are your prompts.\n\nPROMPT 1: Office at dusk, presenter smiles.\n\n\
PROMPT 2: Team huddle around a screen.\n\n**PROMPT 3:** Client call on a tablet.\n\nPROMPT 4: Logo reveal.";
        let p = ScenePrompts::parse(reply);
        assert_eq!(p.prompt_1, "Office at dusk, presenter smiles.");
        assert_eq!(p.prompt_2, "Team huddle around a screen.");
        assert_eq!(p.prompt_3, "Client call on a tablet.");
        assert_eq!(p.prompt_4, "Logo reveal.");
    }

    #[test]
    fn falls_back_to_paragraphs() {
        let reply = "First scene text.\n\nSecond scene text.\n\nThird scene text.";
        let p = ScenePrompts::parse(reply);
        assert_eq!(p.prompt_1, "First scene text.");
        assert_eq!(p.prompt_3, "Third scene text.");
        assert_eq!(p.prompt_4, "Scene 4 prompt not generated");
    }

    #[test]
    fn brief_needs_fifteen_words() {
        assert!(validate_brief("").is_err());
        assert!(validate_brief("We build apps").is_err());
        let ok = "We run a small bakery downtown that sells sourdough pastries and coffee to \
                  commuters every single morning";
        assert!(validate_brief(ok).is_ok());
    }

    #[test]
    fn preview_truncates_on_chars() {
        assert_eq!(preview("héllo world", 5), "héllo...");
        assert_eq!(preview("short", 10), "short");
    }

    #[test]
    fn request_embeds_brief() {
        let text = build_request_text("  Acme rockets  ");
        assert!(text.contains("USER INPUT/COMPANY DESCRIPTION:\nAcme rockets\n"));
        assert!(text.contains("PROMPT 4: [scene]"));
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("generated_prompts.json");
        let prompts = ScenePrompts::from_vec(vec!["a".into(), "b".into()]);
        prompts.save(&path).await.unwrap();
        let text = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(text.contains("\"prompt_2\": \"b\""));
        assert_eq!(ScenePrompts::load(&path).await.unwrap(), prompts);
    }
}
