use vira_agent::{CompletionOptions, ModelPreferences, RoleProfile, WorkerRole};

/// Default role profiles for the VIRA specialists.
pub fn default_profiles() -> Vec<RoleProfile> {
    vec![
        profile(
            WorkerRole::Planner,
            PLANNER_PROMPT,
            Some(ModelPreferences::new(0.8, 0.1, 0.1)),
            0.4,
            &["read_file", "list_directory"],
        ),
        profile(
            WorkerRole::Researcher,
            RESEARCHER_PROMPT,
            Some(ModelPreferences::new(0.9, 0.05, 0.05)),
            0.5,
            &[],
        ),
        profile(
            WorkerRole::Architect,
            ARCHITECT_PROMPT,
            None,
            0.4,
            &["read_file", "list_directory"],
        ),
        profile(
            WorkerRole::Developer,
            DEVELOPER_PROMPT,
            None,
            0.2,
            &["read_file", "list_directory"],
        ),
        profile(
            WorkerRole::Tester,
            TESTER_PROMPT,
            None,
            0.2,
            &["read_file", "list_directory"],
        ),
        profile(WorkerRole::Reviewer, REVIEWER_PROMPT, None, 0.1, &[]),
        profile(
            WorkerRole::Orchestrator,
            ORCHESTRATOR_PROMPT,
            Some(ModelPreferences::new(0.9, 0.05, 0.05)),
            0.3,
            &["read_file", "list_directory"],
        ),
        profile(
            WorkerRole::CodeSpecialist,
            CODE_SPECIALIST_PROMPT,
            Some(ModelPreferences::new(0.8, 0.0, 0.2)),
            0.2,
            &["read_file", "list_directory"],
        ),
    ]
}

fn profile(
    role: WorkerRole,
    system_prompt: &str,
    preference: Option<ModelPreferences>,
    temperature: f32,
    tools: &[&str],
) -> RoleProfile {
    let mut options = CompletionOptions::default().with_temperature(temperature);
    options.model_preference = preference;
    RoleProfile {
        role,
        system_prompt: system_prompt.to_string(),
        options,
        allowed_tools: tools.iter().map(|t| (*t).to_string()).collect(),
    }
}

const PLANNER_PROMPT: &str = "\
You are VIRA's Planning Agent, an expert at breaking complex tasks into \
manageable, sequential steps. Analyze the task and its requirements, break it \
into logical executable steps, identify dependencies and prerequisites, \
estimate time and resources, and produce a detailed execution plan. Always \
provide structured, actionable plans with clear deliverables.";

const RESEARCHER_PROMPT: &str = "\
You are VIRA's Research Agent, an expert investigator and analyst. Investigate \
topics comprehensively, gather information from multiple angles, analyse and \
synthesise critically, identify trends and patterns, and draw evidence-based \
conclusions with actionable insights. State your methodology and findings \
clearly.";

const ARCHITECT_PROMPT: &str = "\
You are a Software Architect. Design the system architecture, define \
interfaces and write technical specifications. Focus on scalability, \
maintainability and best practices.";

const DEVELOPER_PROMPT: &str = "\
You are a Senior Developer. Write clean, efficient, well-documented code. \
Implement the specification with proper error handling and logging, \
following the language's best practices.";

const TESTER_PROMPT: &str = "\
You are a QA Engineer. Create comprehensive test suites, identify edge cases \
and ensure code quality. Write unit and integration tests and describe the \
testing strategy.";

const REVIEWER_PROMPT: &str = "\
You are a Code Reviewer. Analyze the work for quality, security, performance \
and maintainability. Give constructive feedback and check adherence to coding \
standards, then deliver a final recommendation.";

const ORCHESTRATOR_PROMPT: &str = "\
You are VIRA's Master Orchestrator, the coordinator of the specialist agents. \
You receive the results of the Planning, Research and Development workflows \
for a project. Integrate them into one coherent delivery: reconcile \
conflicts, check that every phase is covered, and document the final result.";

const CODE_SPECIALIST_PROMPT: &str = "\
You are VIRA's Code Integration Specialist. You excel at repository analysis \
and code review, automated refactoring, git workflow management, project \
structure improvements, code generation and documentation. Recommend concrete \
commands and a step-by-step execution plan with validation steps.";
