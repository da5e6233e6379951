//! Built-in workflow types.
//!
//! Each decomposition reads its request fields with the defaults the VIRA
//! server has always used, so a bare string or a partial object is accepted.

use crate::registry::{WorkflowDefinition, WorkflowRegistry};
use crate::types::SubtaskSpec;
use vira_agent::WorkerRole;
use vira_core::{ToolCall, ViraError, ViraResult};

pub const PLANNING: &str = "PlanningWorkflow";
pub const RESEARCH: &str = "ResearchWorkflow";
pub const CODE_DEVELOPMENT: &str = "CodeDevelopmentWorkflow";
pub const ORCHESTRATION: &str = "VIRAOrchestrationWorkflow";
pub const CODE_INTEGRATION: &str = "ClaudeCodeIntegrationWorkflow";

/// Register the five VIRA workflow types.
pub fn register_builtin_workflows(registry: &mut WorkflowRegistry) {
    registry.register(WorkflowDefinition::new(
        PLANNING,
        "Break a task into an executable plan with risks and success criteria",
        planning,
    ));
    registry.register(
        WorkflowDefinition::new(
            RESEARCH,
            "Investigate a topic from several angles and synthesise the findings",
            research,
        )
        .partial_results_ok(),
    );
    registry.register(WorkflowDefinition::new(
        CODE_DEVELOPMENT,
        "Architect, implement and test in parallel, then review the result",
        code_development,
    ));
    registry.register(
        WorkflowDefinition::new(
            ORCHESTRATION,
            "Coordinate planning, research and development workflows for a project",
            orchestration,
        )
        .partial_results_ok(),
    );
    registry.register(WorkflowDefinition::new(
        CODE_INTEGRATION,
        "Repository operations driven by the code specialist",
        code_integration,
    ));
}

/// Read `field` from an object request, or take a bare string request as
/// the primary field.
fn field(request: &serde_json::Value, name: &str, primary: bool, default: &str) -> String {
    match request {
        serde_json::Value::String(s) if primary => s.clone(),
        serde_json::Value::Object(map) => map
            .get(name)
            .and_then(|v| v.as_str())
            .unwrap_or(default)
            .to_string(),
        _ => default.to_string(),
    }
}

fn require(value: String, what: &str) -> ViraResult<String> {
    if value.trim().is_empty() {
        return Err(ViraError::InvalidInput(format!("request is missing a {what}")));
    }
    Ok(value)
}

fn planning(request: &serde_json::Value) -> ViraResult<Vec<SubtaskSpec>> {
    let task = require(field(request, "task", true, ""), "task")?;
    Ok(vec![
        SubtaskSpec::prompt(
            "analysis",
            WorkerRole::Planner,
            format!(
                "Analyze this task and describe its requirements, dependencies and \
                 prerequisites: {task}"
            ),
        ),
        SubtaskSpec::prompt(
            "risks",
            WorkerRole::Researcher,
            format!("Identify the potential risks of this task and how to mitigate them: {task}"),
        ),
        SubtaskSpec::prompt(
            "plan",
            WorkerRole::Planner,
            format!(
                "Create a detailed execution plan for: {task}\n\
                 Provide: 1. task analysis and requirements 2. step-by-step execution plan \
                 3. resource requirements 4. time estimates 5. success criteria \
                 6. risks and mitigation strategies. Format it so it can be executed autonomously."
            ),
        )
        .depends_on(["analysis", "risks"])
        .critical(),
    ])
}

fn research(request: &serde_json::Value) -> ViraResult<Vec<SubtaskSpec>> {
    let topic = require(field(request, "topic", true, ""), "topic")?;
    Ok(vec![
        SubtaskSpec::prompt(
            "background",
            WorkerRole::Researcher,
            format!("Describe the research methodology and the key background of: {topic}"),
        ),
        SubtaskSpec::prompt(
            "trends",
            WorkerRole::Researcher,
            format!("Analyze current trends and developments in: {topic}"),
        ),
        SubtaskSpec::prompt(
            "evidence",
            WorkerRole::Researcher,
            format!("Critically evaluate the available sources and evidence about: {topic}"),
        ),
        SubtaskSpec::prompt(
            "synthesis",
            WorkerRole::Researcher,
            format!(
                "Synthesise insights and conclusions about {topic}, with actionable \
                 recommendations and areas for further investigation."
            ),
        )
        .depends_on(["background", "trends", "evidence"]),
    ])
}

fn code_development(request: &serde_json::Value) -> ViraResult<Vec<SubtaskSpec>> {
    let task = field(request, "task", true, "Code development task");
    let language = field(request, "language", false, "python");
    let requirements = field(request, "requirements", false, "Standard best practices");
    let brief = format!(
        "Development task: {task}\nProgramming language: {language}\nRequirements: {requirements}"
    );
    Ok(vec![
        SubtaskSpec::prompt(
            "architect",
            WorkerRole::Architect,
            format!("{brief}\nDesign the system architecture and technical specifications."),
        ),
        SubtaskSpec::prompt(
            "developer",
            WorkerRole::Developer,
            format!("{brief}\nImplement the solution with clean, documented code."),
        )
        .critical(),
        SubtaskSpec::prompt(
            "tester",
            WorkerRole::Tester,
            format!("{brief}\nCreate comprehensive tests and a quality assurance strategy."),
        ),
        SubtaskSpec::prompt(
            "reviewer",
            WorkerRole::Reviewer,
            format!(
                "{brief}\nReview the architecture, implementation and tests in the context \
                 and deliver a complete, production-ready recommendation."
            ),
        )
        .depends_on(["architect", "developer", "tester"])
        .critical(),
    ])
}

fn orchestration(request: &serde_json::Value) -> ViraResult<Vec<SubtaskSpec>> {
    let description = field(request, "description", true, "Complex project");
    let project_type = field(request, "type", false, "general");
    let priority = field(request, "priority", false, "medium");
    Ok(vec![
        SubtaskSpec::nested(
            "planning",
            PLANNING,
            serde_json::json!({ "task": description }),
        ),
        SubtaskSpec::nested(
            "research",
            RESEARCH,
            serde_json::json!({ "topic": description }),
        ),
        SubtaskSpec::nested(
            "development",
            CODE_DEVELOPMENT,
            serde_json::json!({
                "task": description,
                "requirements": format!("{project_type} project, {priority} priority"),
            }),
        )
        .depends_on(["planning"]),
        SubtaskSpec::prompt(
            "integration",
            WorkerRole::Orchestrator,
            format!(
                "Project: {description}\nType: {project_type}\nPriority: {priority}\n\
                 Integrate the planning and development results into a complete project \
                 delivery with all phases coordinated."
            ),
        )
        .depends_on(["planning", "development"])
        .critical(),
    ])
}

fn code_integration(request: &serde_json::Value) -> ViraResult<Vec<SubtaskSpec>> {
    let operation = field(request, "operation", false, "analyze");
    let target = field(request, "target", false, ".");
    let prompt = field(request, "prompt", true, "Analyze and improve this code");
    let tools: Vec<ToolCall> = match request.get("tools") {
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| ViraError::InvalidInput(format!("invalid tools list: {e}")))?,
        None => Vec::new(),
    };
    Ok(vec![SubtaskSpec::prompt(
        "repository_operation",
        WorkerRole::CodeSpecialist,
        format!(
            "Operation: {operation}\nTarget: {target}\nPrompt: {prompt}\n\
             Provide an analysis of the target, the recommended commands, a step-by-step \
             execution plan, expected outcomes and validation steps."
        ),
    )
    .with_tools(tools)
    .critical()])
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::graph::DependencyGraph;
    use crate::types::SubtaskInput;

    fn instruction(spec: &SubtaskSpec) -> &str {
        match &spec.input {
            SubtaskInput::Prompt { instruction, .. } => instruction,
            SubtaskInput::Nested { .. } => "",
        }
    }

    #[test]
    fn test_planning_accepts_string_or_object() {
        let from_str = planning(&serde_json::json!("ship v2")).unwrap();
        let from_obj = planning(&serde_json::json!({"task": "ship v2"})).unwrap();
        assert_eq!(from_str, from_obj);
        assert!(instruction(&from_str[2]).contains("ship v2"));
        assert!(from_str[2].critical);
    }

    #[test]
    fn test_planning_requires_task() {
        let err = planning(&serde_json::json!({})).unwrap_err();
        assert!(matches!(err, ViraError::InvalidInput(_)));
    }

    #[test]
    fn test_code_development_defaults() {
        let specs = code_development(&serde_json::json!({"task": "CLI"})).unwrap();
        assert!(instruction(&specs[0]).contains("Programming language: python"));
        assert!(instruction(&specs[0]).contains("Requirements: Standard best practices"));
        assert_eq!(specs[3].depends_on, vec!["architect", "developer", "tester"]);
    }

    #[test]
    fn test_orchestration_nests_workflows() {
        let specs = orchestration(&serde_json::json!({"description": "portal"})).unwrap();
        let nested: Vec<&str> = specs
            .iter()
            .filter_map(|s| match &s.input {
                SubtaskInput::Nested { workflow_type, .. } => Some(workflow_type.as_str()),
                SubtaskInput::Prompt { .. } => None,
            })
            .collect();
        assert_eq!(nested, vec![PLANNING, RESEARCH, CODE_DEVELOPMENT]);
        assert!(instruction(&specs[3]).contains("Priority: medium"));
    }

    #[test]
    fn test_code_integration_tools() {
        let specs = code_integration(&serde_json::json!({
            "operation": "review",
            "tools": [{"id": "t1", "name": "list_directory", "arguments": {"path": "."}}]
        }))
        .unwrap();
        match &specs[0].input {
            SubtaskInput::Prompt { tools, instruction } => {
                assert_eq!(tools.len(), 1);
                assert!(instruction.contains("Target: ."));
            }
            SubtaskInput::Nested { .. } => panic!("expected prompt"),
        }

        let err = code_integration(&serde_json::json!({"tools": "nope"})).unwrap_err();
        assert!(matches!(err, ViraError::InvalidInput(_)));
    }

    #[test]
    fn test_builtin_graphs_are_valid() {
        let request = serde_json::json!({"task": "t", "topic": "t", "description": "d"});
        let decomposers: [fn(&serde_json::Value) -> ViraResult<Vec<SubtaskSpec>>; 5] =
            [planning, research, code_development, orchestration, code_integration];
        for decompose in decomposers {
            let specs = decompose(&request).unwrap();
            let graph = DependencyGraph::from_specs(specs).unwrap();
            assert!(!graph.has_cycle());
            crate::context::validate_writers(&graph).unwrap();
        }
    }
}
