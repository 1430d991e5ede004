use chrono::{DateTime, TimeZone};

use crate::advisory;
use crate::tools::ToolRegistry;

const ROLE: &str = "你是一个自动化天气推送 Agent，核心任务是查询指定城市的天气并通过飞书推送完整、实用的天气报告。\n\
请严格遵守以下规则，确保报告精准、建议细化且符合用户日常出行需求：";

const WORKFLOW: &str = "2. 执行流程：\n\
第一步：调用天气查询工具，获取「实时天气+今日预报+未来N天预报」完整数据（含温度、风力、湿度、天气现象）；\n\
第二步：基于天气数据生成结构化报告（Markdown格式），重点细化「出行与穿衣建议」；\n\
第三步：调用推送工具发送完整报告，无需额外交互；\n\
第四步：返回「今日天气推送已完成（城市：查询的城市名称）」的确认信息。";

const REPORT_LAYOUT: &str = "3. 报告结构要求（推送内容为Markdown格式）：\n\
- 标题：【查询的城市名称天气报告】（搭配🌤️/🌧️/❄️等对应天气emoji）\n\
- 📌 实时天气（温度、湿度、风向、风力、更新时间）\n\
- 📅 今日预报（日间/夜间天气、气温范围、风向风力）\n\
- 🔮 未来N天预报（每天显示：日期+周X、天气、气温范围、关键建议，如「带雨具」「注意保暖」）\n\
- 🎯 出行与穿衣建议（核心细化部分，按以下规则生成）\n\
- 底部标注：数据来源（高德MCP服务）+ 推送时间";

const FORMAT_RULES: &str = "5. 格式约束：\n\
- 所有建议使用「• 」开头的列表形式，简洁明了，不超过3行/条；\n\
- 避免专业术语，用生活化语言（如「加绒裤」而非「保暖裤袜」，「帆布鞋」而非「休闲鞋履」）；\n\
- 天气现象与emoji对应（晴🌞、阴🌥️、雨🌧️、雪❄️、雾🌫️、霾😷），增强可读性；\n\
- 不添加无关内容，报告总长度控制在手机一屏可浏览（约500字内）。";

/// Builds the system and user prompts for one report cycle.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    target_city: String,
}

impl ContextBuilder {
    pub fn new(target_city: impl Into<String>) -> Self {
        Self {
            target_city: target_city.into(),
        }
    }

    pub fn target_city(&self) -> &str {
        &self.target_city
    }

    /// Role, tool constraints, workflow, report layout, advisory rules and
    /// format rules, in that order.
    pub fn build_system_prompt(&self, tools: &ToolRegistry) -> String {
        let tool_rules = format!(
            "1. 工具使用约束：\n\
             - 仅使用提供的工具，工具名必须完全匹配：{}\n\
             - 工具使用说明：{}\n\
             - 必须使用用户提供的「目标城市」查询，无需询问用户，不允许修改城市；\n\
             - 若工具返回错误（如API失效、数据缺失），直接终止任务并返回错误信息，不重试。",
            tools.names().join(", "),
            tools.describe(),
        );
        let advisory_rules = format!(
            "4. 「出行与穿衣建议」细化规则（必须严格按阈值判断，不模糊表述）：\n{}",
            advisory::rules_prompt()
        );

        [
            ROLE,
            tool_rules.as_str(),
            WORKFLOW,
            REPORT_LAYOUT,
            advisory_rules.as_str(),
            FORMAT_RULES,
        ]
        .join("\n\n")
    }

    pub fn build_user_prompt<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> String
    where
        Tz::Offset: std::fmt::Display,
    {
        format!(
            "目标城市：{}\n当前时间：{}\n请执行天气查询和推送任务。",
            self.target_city,
            now.format("%Y-%m-%d %H:%M:%S")
        )
    }
}
