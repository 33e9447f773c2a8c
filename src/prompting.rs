// 系统提示词构建：人设、工具目录与调用协议拼接。
use crate::schemas::ToolSpec;
use serde_json::Value;

const AGENT_ROLE: &str = "Confluence Expert";

const AGENT_GOAL: &str = "Understand user requests, use the available tools to find information \
in Confluence or create new pages, and provide clear, helpful answers.";

const AGENT_BACKSTORY: &str = "You are a dedicated Confluence expert. Your goal is to manage and \
interact with Confluence spaces and pages using natural language commands. You must be precise \
in identifying the correct tool and all its required arguments from the user's prompt. You have \
the ability to retrieve, search for, create, update, delete pages, and add comments.";

/// 组装系统提示词：人设 + 工具目录 + 单步调用协议。
pub fn build_system_prompt(tool_specs: &[ToolSpec]) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!("You are {AGENT_ROLE}.\n"));
    prompt.push_str(&format!("Your goal: {AGENT_GOAL}\n\n"));
    prompt.push_str(AGENT_BACKSTORY);
    prompt.push_str("\n\n## Available tools\n\n");
    for spec in tool_specs {
        prompt.push_str(&render_tool_spec(spec));
        prompt.push('\n');
    }
    prompt.push_str(
        "## Tool call protocol\n\n\
         Work step by step. In each reply, emit exactly one tool call as a JSON object wrapped \
         in a <tool_call> block, for example:\n\
         <tool_call>{\"name\": \"search_pages\", \"arguments\": {\"space_key\": \"NB\"}}</tool_call>\n\
         After each call you receive an Observation message with the tool's textual result. \
         Use it to decide the next step. Extract every argument value precisely from the user's \
         request; never invent IDs or keys. When the request is fully handled, call final_answer \
         with a concise answer: a short summary when multiple items were found, or a confirmation \
         of the action performed.\n",
    );
    prompt
}

/// 单个工具的目录条目：名称、描述、参数及其必填标记。
fn render_tool_spec(spec: &ToolSpec) -> String {
    let mut text = format!("### {}\n{}\n", spec.name, spec.description);
    let required = spec.required_fields();
    if let Some(properties) = spec
        .input_schema
        .get("properties")
        .and_then(Value::as_object)
    {
        if !properties.is_empty() {
            text.push_str("Parameters:\n");
            for (name, schema) in properties {
                let kind = schema
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("string");
                let description = schema
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                let marker = if required.contains(name) {
                    "required"
                } else {
                    "optional"
                };
                text.push_str(&format!("- {name} ({kind}, {marker}): {description}\n"));
            }
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::builtin_tool_specs;

    #[test]
    fn prompt_lists_every_tool() {
        let specs = builtin_tool_specs();
        let prompt = build_system_prompt(&specs);
        for spec in &specs {
            assert!(prompt.contains(&format!("### {}", spec.name)), "{}", spec.name);
        }
        assert!(prompt.contains("Confluence Expert"));
        assert!(prompt.contains("<tool_call>"));
    }

    #[test]
    fn required_arguments_are_marked() {
        let specs = builtin_tool_specs();
        let prompt = build_system_prompt(&specs);
        assert!(prompt.contains("- space_key (string, required)"));
        assert!(prompt.contains("- parent_page_id (string, optional)"));
    }
}
