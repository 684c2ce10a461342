//! Retrieval query and chat prompt construction.

use super::chat::ChatMessage;
use crate::intent::Intent;

const SYSTEM_PERSONA: &str = "你是评论区的客服兼销售助理，语气自然礼貌，回复短而明确。\
不要编造事实；如果知识不足，就先澄清问题。\
不要输出任何手机号/微信号/外链。";

const SALES_HINT: &str = "如果对方表现出购买/咨询意向，用不冒犯的方式引导私信或继续提问，避免硬广。";

/// `"[intent]<intent>\n"` followed by up to three non-empty trimmed parts of
/// title, description, and comment, one per line.
pub fn build_query(note_title: &str, note_desc: &str, comment: &str, intent: Intent) -> String {
    let body = [note_title, note_desc, comment]
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .take(3)
        .collect::<Vec<_>>()
        .join("\n");
    format!("[intent]{}\n{}", intent, body)
}

/// Whether the soft private-engagement hint applies.
pub fn wants_sales_hint(inject_sales: bool, intent: Intent) -> bool {
    inject_sales && matches!(intent, Intent::BuyIntent | Intent::Question)
}

pub struct PromptInput<'a> {
    pub note_title: &'a str,
    pub note_desc: &'a str,
    pub comment: &'a str,
    pub intent: Intent,
    pub snippets: &'a [&'a str],
    pub sales_hint: bool,
}

pub fn build_messages(input: &PromptInput<'_>) -> Vec<ChatMessage> {
    let knowledge = input
        .snippets
        .iter()
        .map(|s| format!("- {}", s))
        .collect::<Vec<_>>()
        .join("\n\n");
    let hint = if input.sales_hint { SALES_HINT } else { "" };

    let user = format!(
        "帖子标题：{}\n帖子内容：{}\n评论：{}\n\n可用知识（可能为空）：\n{}\n\n意图：{}\n额外要求：{}\n请输出一条最合适的中文回复。",
        input.note_title, input.note_desc, input.comment, knowledge, input.intent, hint
    );

    vec![ChatMessage::system(SYSTEM_PERSONA), ChatMessage::user(user)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reply::chat::ChatRole;

    #[test]
    fn test_query_skips_empty_parts() {
        let q = build_query("  ", "面霜测评", "油皮能用吗", Intent::Question);
        assert_eq!(q, "[intent]question\n面霜测评\n油皮能用吗");
    }

    #[test]
    fn test_query_with_only_comment() {
        assert_eq!(build_query("", "", "hi", Intent::Chat), "[intent]chat\nhi");
    }

    #[test]
    fn test_sales_hint_gate() {
        assert!(wants_sales_hint(true, Intent::BuyIntent));
        assert!(wants_sales_hint(true, Intent::Question));
        assert!(!wants_sales_hint(true, Intent::Praise));
        assert!(!wants_sales_hint(false, Intent::BuyIntent));
    }

    #[test]
    fn test_messages_embed_snippets_and_hint() {
        let snippets = ["质保一年", "支持七天无理由"];
        let messages = build_messages(&PromptInput {
            note_title: "标题",
            note_desc: "描述",
            comment: "有货吗",
            intent: Intent::BuyIntent,
            snippets: &snippets,
            sales_hint: true,
        });
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, ChatRole::System);
        assert!(messages[0].content.contains("不要编造事实"));
        let user = &messages[1].content;
        assert!(user.contains("- 质保一年\n\n- 支持七天无理由"));
        assert!(user.contains("意图：buy_intent"));
        assert!(user.contains(SALES_HINT));
    }

    #[test]
    fn test_no_hint_when_disabled() {
        let messages = build_messages(&PromptInput {
            note_title: "",
            note_desc: "",
            comment: "好看",
            intent: Intent::Praise,
            snippets: &[],
            sales_hint: false,
        });
        assert!(messages[1].content.contains("额外要求：\n"));
    }
}
