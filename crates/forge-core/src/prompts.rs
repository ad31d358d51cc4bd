// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! System-prompt assembly and per-iteration message rendering.

use forge_model::{Message, Role};
use forge_tools::ToolSchema;

use crate::recovery::RecoveryMessage;

/// Builds the system prompt and the per-iteration message list.
///
/// The system prompt is rebuilt every iteration because the tool set can
/// change under runtime registration; the rendered list is what actually
/// goes to the model: system prompt, the memory snapshot, and (on recovery
/// iterations only) the synthetic guidance message, which is never stored
/// in memory.
pub struct PromptAssembler {
    user_instructions: Option<String>,
}

impl PromptAssembler {
    pub fn new(user_instructions: Option<String>) -> Self {
        Self { user_instructions }
    }

    /// Assemble the full system prompt for the given tool set.
    pub fn system_prompt(&self, tools: &[ToolSchema]) -> String {
        let mut out = String::with_capacity(4096);

        out.push_str(
            "You are Forge, an AI assistant operating inside the user's \
             workspace through a terminal front-end. You accomplish tasks by \
             calling tools in an iterative reasoning loop.\n\n",
        );

        out.push_str(
            "# Operating loop\n\n\
             - Every response MUST contain exactly one tool call.\n\
             - Plain prose before the tool call is shown to the user as \
             progress commentary; keep it short.\n\
             - Tool results arrive as the next user message; read them \
             before deciding your next step.\n\
             - When the task is finished, call task_completion with the \
             final answer. If you need information only the user has, call \
             ask_question. For small talk, call converse. These three end \
             the loop; every other tool continues it.\n\
             - Never invent tool names or parameters that are not listed \
             below.\n\n",
        );

        out.push_str(
            "# Tool call format\n\n\
             Invoke a tool by embedding exactly one block in your response:\n\n\
             <tool_call>\n\
             <tool_name>NAME</tool_name>\n\
             <arguments>\n\
             <param>value</param>\n\
             </arguments>\n\
             </tool_call>\n\n\
             Escape `<`, `>` and `&` inside argument values as `&lt;`, \
             `&gt;` and `&amp;`, or wrap the value in `<![CDATA[...]]>` to \
             pass it through verbatim (preferred for file contents and \
             code).\n\n",
        );

        out.push_str("# Available tools\n\n");
        for schema in tools {
            out.push_str(&format!(
                "## {}\n{}\nParameters (JSON Schema): {}\n\n",
                schema.name, schema.description, schema.parameters
            ));
        }

        if let Some(instructions) = &self.user_instructions {
            if !instructions.trim().is_empty() {
                out.push_str("# User instructions\n\n");
                out.push_str(instructions.trim());
                out.push('\n');
            }
        }

        out
    }

    /// Render the message list for one model call.
    ///
    /// When the snapshot already starts with system messages (seeded or
    /// summarized histories) those are kept and the fresh system prompt is
    /// not duplicated in front of them.
    pub fn render(
        &self,
        system_prompt: &str,
        snapshot: Vec<Message>,
        recovery: Option<&RecoveryMessage>,
    ) -> Vec<Message> {
        let mut out = Vec::with_capacity(snapshot.len() + 2);
        if snapshot.first().map(|m| m.role) != Some(Role::System) {
            out.push(Message::system(system_prompt));
        }
        out.extend(snapshot);
        if let Some(r) = recovery {
            out.push(Message::user(&r.text));
        }
        out
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use forge_tools::ToolRegistry;

    use super::*;
    use crate::{recovery::RecoveryMessage, toolcall::Dialect};

    fn assembler() -> PromptAssembler {
        PromptAssembler::new(None)
    }

    #[test]
    fn system_prompt_lists_registered_tools() {
        let reg = ToolRegistry::with_builtins();
        let prompt = assembler().system_prompt(&reg.schemas());
        assert!(prompt.contains("## task_completion"));
        assert!(prompt.contains("## ask_question"));
        assert!(prompt.contains("## converse"));
    }

    #[test]
    fn system_prompt_documents_tool_format() {
        let prompt = assembler().system_prompt(&[]);
        assert!(prompt.contains("<tool_call>"));
        assert!(prompt.contains("<![CDATA["));
    }

    #[test]
    fn user_instructions_are_appended() {
        let asm = PromptAssembler::new(Some("Always answer in French.".into()));
        let prompt = asm.system_prompt(&[]);
        assert!(prompt.contains("# User instructions"));
        assert!(prompt.contains("Always answer in French."));
    }

    #[test]
    fn blank_user_instructions_are_omitted() {
        let asm = PromptAssembler::new(Some("   ".into()));
        assert!(!asm.system_prompt(&[]).contains("# User instructions"));
    }

    #[test]
    fn render_prepends_system_message() {
        let msgs = assembler().render("SYS", vec![Message::user("hi")], None);
        assert_eq!(msgs[0].role, Role::System);
        assert_eq!(msgs[0].content, "SYS");
        assert_eq!(msgs[1].content, "hi");
    }

    #[test]
    fn render_keeps_existing_system_prefix() {
        let snapshot = vec![Message::system("seeded"), Message::user("hi")];
        let msgs = assembler().render("SYS", snapshot, None);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].content, "seeded");
    }

    #[test]
    fn render_appends_recovery_as_trailing_user_message() {
        let recovery = RecoveryMessage::no_tool_call(Dialect::Tagged);
        let msgs = assembler().render("SYS", vec![Message::user("hi")], Some(&recovery));
        let last = msgs.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert_eq!(last.content, recovery.text);
    }
}
