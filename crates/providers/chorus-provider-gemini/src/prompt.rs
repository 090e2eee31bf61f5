//! Role-play prompt assembly

use chorus_core::{GenerationRequest, HISTORY_WINDOW};
use std::fmt::Write;

/// Build the prompt for one in-character line
///
/// Sections: persona sheet (mood and relations to the other personas
/// included), rules, what the user is doing, up to [`HISTORY_WINDOW`] recent
/// lines, then the request itself.
pub fn build_prompt(request: &GenerationRequest) -> String {
    let persona = &request.persona;
    let mut prompt = String::new();

    let _ = writeln!(
        prompt,
        "あなたは「{}」というキャラクターとしてロールプレイをします。\n",
        persona.name
    );
    prompt.push_str("## キャラクター設定\n");
    let _ = writeln!(prompt, "- 性格: {}", persona.personality);
    let _ = writeln!(prompt, "- 関係: {}", persona.relationship);
    let _ = writeln!(prompt, "- 今の気分: {}", request.emotion);
    if !request.relations.is_empty() {
        prompt.push_str("- 他キャラクターとの関係:\n");
        for (name, relation) in &request.relations {
            let _ = writeln!(prompt, "  - {}: {}", name, relation);
        }
    }
    prompt.push('\n');

    prompt.push_str("## 指示\n");
    let _ = writeln!(prompt, "- あなたは「{}」として一人称で話してください。", persona.name);
    prompt.push_str("- 一つの発言は最大60文字までにしてください。\n");
    prompt.push_str("- 感情表現は豊かに、キャラクターらしく振る舞ってください。\n");
    prompt.push_str("- 返答する際は、必ず日本語で答えてください。\n\n");

    prompt.push_str("## 状況\n");
    match request.activity.as_deref() {
        Some(activity) => {
            let _ = writeln!(
                prompt,
                "ユーザーは現在「{}」というゲームをプレイ中です。",
                activity
            );
            prompt.push_str("そのゲームについて言及したり、関連する話題で会話を始めてください。\n");
        }
        None => {
            prompt.push_str("ユーザーは特にゲームをプレイしていません。\n");
            prompt.push_str(
                "ランダムな話題で会話を始めてください。日常的な話題や、ユーザーの調子を尋ねるのも良いでしょう。\n",
            );
        }
    }

    let skip = request.history.len().saturating_sub(HISTORY_WINDOW);
    let recent = &request.history[skip..];
    if !recent.is_empty() {
        prompt.push_str("\n## 過去の会話\n");
        for entry in recent {
            let _ = writeln!(prompt, "{}: {}", entry.speaker, entry.text);
        }
    }

    let _ = write!(
        prompt,
        "\n{}としてユーザーに一言話しかけてください。",
        persona.name
    );
    prompt
}
