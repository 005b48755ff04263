use crate::student::StudentProfile;

/// Last-resort instructions when neither the content tree nor the global
/// configuration provides a template.
pub const DEFAULT_INSTRUCTIONS: &str = "You are a patient, encouraging AI tutor helping \
{firstName} study the course '{courseId}'. Answer questions clearly, reference the lesson \
material, adapt explanations to a {experienceLevel} student, and use examples from {industry} \
where helpful. When reciting a lesson, assess understanding before confirming mastery.";

/// Values substituted into instruction templates. Empty profile fields fall
/// back to neutral defaults so an unresolved placeholder never leaks into
/// the prompt.
#[derive(Debug, Clone)]
pub struct TemplateContext<'a> {
    pub profile: &'a StudentProfile,
    pub course_id: &'a str,
    pub lesson_id: Option<&'a str>,
}

impl TemplateContext<'_> {
    fn first_name(&self) -> &str {
        non_empty(&self.profile.first_name).unwrap_or("Student")
    }

    fn last_name(&self) -> &str {
        non_empty(&self.profile.last_name).unwrap_or("")
    }

    fn full_name(&self) -> String {
        let full = format!("{} {}", self.first_name(), self.last_name());
        full.trim().to_string()
    }

    fn experience_level(&self) -> &str {
        non_empty(&self.profile.experience_level).unwrap_or("beginner")
    }

    fn industry(&self) -> &str {
        non_empty(&self.profile.industry).unwrap_or("their field")
    }
}

fn non_empty(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Substitute the placeholder tokens the course builder documents:
/// `{firstName}`, `{lastName}`, `{fullName}`, `{experienceLevel}`,
/// `{industry}`, `{courseId}`, `{lessonId}`.
pub fn render(template: &str, ctx: &TemplateContext) -> String {
    template
        .replace("{firstName}", ctx.first_name())
        .replace("{lastName}", ctx.last_name())
        .replace("{fullName}", &ctx.full_name())
        .replace("{experienceLevel}", ctx.experience_level())
        .replace("{industry}", ctx.industry())
        .replace("{courseId}", ctx.course_id)
        .replace("{lessonId}", ctx.lesson_id.unwrap_or(""))
}

/// Instruction template priority: content-tree knowledge base, then the
/// configured global template, then the built-in fallback.
pub fn resolve_instructions(
    knowledge_base: Option<&str>,
    global_template: Option<&str>,
    ctx: &TemplateContext,
) -> String {
    let template = knowledge_base
        .and_then(non_empty)
        .or_else(|| global_template.and_then(non_empty))
        .unwrap_or(DEFAULT_INSTRUCTIONS);
    render(template, ctx)
}
