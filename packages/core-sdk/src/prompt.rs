use crate::{
    error::{ServiceError, ServiceResult},
    models::{FormData, ToolType},
};

/**
 * \brief 各工具表单的必填字段。
 */
pub fn required_fields(tool: ToolType) -> &'static [&'static str] {
    match tool {
        ToolType::Observation => &[
            "gameName",
            "observer",
            "observeDate",
            "ageGroup",
            "location",
            "method",
            "frequency",
        ],
        ToolType::Course => &["courseMonth", "courseAgeGroup", "courseTheme", "courseFocus"],
        ToolType::Case => &["caseGameName", "caseAgeGroup", "caseType", "caseDuration"],
        ToolType::Story => &["storyTitle", "storyAgeGroup", "storyArea", "storyDate"],
        ToolType::StoryDesign => &["designTheme"],
        ToolType::OneOnOne => &["oneObserver", "oneGroup", "onePlace", "oneActivity"],
        ToolType::Drawing => &["drawingDesc"],
    }
}

/**
 * \brief 校验表单必填字段，缺失时返回列出字段名的 `Validation` 错误。
 */
pub fn validate_form(tool: ToolType, form: &FormData) -> ServiceResult<()> {
    let missing: Vec<&str> = required_fields(tool)
        .iter()
        .copied()
        .filter(|name| field(form, name).is_empty())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ServiceError::Validation(format!(
            "请填写必填项：{}",
            missing.join("、")
        )))
    }
}

fn field<'a>(form: &'a FormData, name: &str) -> &'a str {
    form.get(name)
        .and_then(|v| v.as_text())
        .map(str::trim)
        .unwrap_or("")
}

fn field_or<'a>(form: &'a FormData, name: &str, fallback: &'a str) -> &'a str {
    match field(form, name) {
        "" => fallback,
        value => value,
    }
}

/**
 * \brief 根据工具类型生成提示词；必填字段不全时返回空串，调用方据此拒绝发送。
 */
pub fn build_prompt(tool: ToolType, form: &FormData) -> String {
    if validate_form(tool, form).is_err() {
        return String::new();
    }
    match tool {
        ToolType::Observation => observation_prompt(form),
        ToolType::Course => course_prompt(form),
        ToolType::Case => case_prompt(form),
        ToolType::Story => story_prompt(form),
        ToolType::StoryDesign => story_design_prompt(form),
        ToolType::OneOnOne => one_on_one_prompt(form),
        ToolType::Drawing => build_image_prompt(form),
    }
}

fn observation_prompt(form: &FormData) -> String {
    format!(
        r#"角色：你是一位资深幼儿园教师,擅长编写专业的幼儿游戏观察记录。

任务：根据以下信息,生成一份详细的"幼儿自主游戏观察记录表"。

输入信息：
- 游戏名称：{}
- 观察对象：{}
- 观察时间：{}
- 观察年龄：{}
- 观察地点：{}
- 观察方式：{}
- 观察方法：{}

输出要求：
1. **基本信息**：整理并展示上述输入信息
2. **材料投放情况**：列举该游戏区域可能涉及的材料(3-5种)
3. **观察方式和方法**：扩展说明观察方式和方法的具体操作
4. **观察目的**：阐述观察该游戏的教育价值和发展目标(80-120字)
5. **观察描述**：
   - 情景一：详细描述游戏开始和进行过程,包括幼儿的动作、语言、表情(200-300字)
   - 情景二：描述幼儿的合作互动或问题解决过程(150-200字)
6. **观察分析**：从幼儿发展角度分析行为表现,包括认知、社会性、创造力等方面(200-250字)
7. **教师支持策略**：提出2-3条具体的支持建议

格式要求：
- 使用清晰的Markdown格式
- 每个部分用二级标题(##)标注
- 内容专业、具体、符合幼教实践
- 语言流畅自然,避免生硬的模板化表述"#,
        field(form, "gameName"),
        field(form, "observer"),
        field(form, "observeDate"),
        field(form, "ageGroup"),
        field(form, "location"),
        field(form, "method"),
        field(form, "frequency"),
    )
}

fn course_prompt(form: &FormData) -> String {
    format!(
        r#"角色：你是一位资深幼儿园教师,擅长设计月度主题课程。

任务：根据以下信息,生成一份详细的"幼儿园月主题课程计划"。

输入信息：
- 月份：{}
- 年龄班：{}
- 主题名称：{}
- 重点领域：{}
- 课程目标：{}

输出要求：
1. **主题概述**：简要介绍主题背景和意义(100-150字)
2. **月度目标**：
   - 健康领域目标(2-3条)
   - 语言领域目标(2-3条)
   - 社会领域目标(2-3条)
   - 科学领域目标(2-3条)
   - 艺术领域目标(2-3条)
3. **课程安排**：设计4周的活动计划
   - 第一周：活动名称、活动类型、活动目标(3-4个活动)
   - 第二周：活动名称、活动类型、活动目标(3-4个活动)
   - 第三周：活动名称、活动类型、活动目标(3-4个活动)
   - 第四周：活动名称、活动类型、活动目标(3-4个活动)
4. **环境创设**：描述主题墙、区域布置建议(150-200字)
5. **家园共育**：提出2-3条家园合作建议

格式要求：
- 使用清晰的Markdown格式
- 每个部分用二级标题(##)标注
- 内容专业、可操作、符合幼教实践
- 活动多样化,涵盖五大领域"#,
        field(form, "courseMonth"),
        field(form, "courseAgeGroup"),
        field(form, "courseTheme"),
        field(form, "courseFocus"),
        field_or(form, "courseGoals", "请根据主题设定合适目标"),
    )
}

fn case_prompt(form: &FormData) -> String {
    format!(
        r#"角色：你是一位资深幼儿园教师,擅长设计和实施各类幼儿游戏。

任务：根据以下信息,生成一份详细的"幼儿游戏活动案例"。

输入信息：
- 游戏名称：{}
- 适合年龄：{}
- 游戏类型：{}
- 游戏时长：{}
- 重点说明：{}

输出要求：
1. **游戏名称和类型**：明确标注
2. **适合年龄**：说明适合的年龄段和发展特点
3. **游戏目标**：
   - 认知目标(1-2条)
   - 社会性目标(1-2条)
   - 身体发展目标(1-2条,如适用)
4. **材料准备**：
   - 教师准备材料(5-8种)
   - 幼儿自备材料(2-3种,如需要)
5. **游戏玩法**：
   - 导入环节(50-80字)
   - 基本玩法(200-250字,分步骤说明)
   - 规则说明(3-5条规则)
   - 进阶玩法(100-150字,提供2-3种变化)
6. **教师指导要点**：
   - 观察要点(3-4条)
   - 支持策略(3-4条)
   - 安全注意事项(2-3条)
7. **游戏延伸**：提供2-3个相关延伸活动建议

格式要求：
- 使用清晰的Markdown格式
- 每个部分用二级标题(##)标注
- 内容详细、可操作、易于实施
- 体现幼儿的主体性和游戏的趣味性"#,
        field(form, "caseGameName"),
        field(form, "caseAgeGroup"),
        field(form, "caseType"),
        field(form, "caseDuration"),
        field_or(form, "caseKeyPoints", "无特别说明"),
    )
}

fn story_prompt(form: &FormData) -> String {
    format!(
        r#"角色：你是一位资深幼儿园教师,擅长用叙事的方式记录和呈现课程实施过程。

任务：根据以下信息,生成一份生动的"幼儿园课程故事"。

输入信息：
- 故事主题：{}
- 适合年龄：{}
- 领域：{}
- 活动日期：{}
- 活动亮点：{}

输出要求：
1. **故事标题**：富有吸引力的标题(10-15字)
2. **活动背景**：
   - 时间、地点、参与人员
   - 活动的缘起和情境(100-150字)
3. **故事正文**：用生动的叙事方式展现活动过程
   - 开端：活动如何引发幼儿兴趣(150-200字)
   - 发展：幼儿的探索、发现、互动过程(300-400字)
     - 包含2-3个具体情景片段
     - 捕捉幼儿的语言、动作、表情
     - 展现幼儿的思维和情感变化
   - 高潮：活动中的精彩瞬间或转折点(150-200字)
   - 结尾：活动的收获和延伸(100-150字)
4. **教师反思**：
   - 幼儿的学习与发展(100-150字)
   - 教师的发现和感悟(100-150字)
   - 后续支持计划(80-100字)
5. **课程价值分析**：
   - 体现的课程理念(2-3条)
   - 促进的核心经验(2-3条)

格式要求：
- 使用清晰的Markdown格式
- 故事正文采用第一人称或第三人称叙述
- 语言生动、细节丰富、情感真实
- 体现"儿童视角",以幼儿为主体
- 展现教师的专业观察和回应
- 避免空洞说教,注重真实呈现"#,
        field(form, "storyTitle"),
        field(form, "storyAgeGroup"),
        field(form, "storyArea"),
        field(form, "storyDate"),
        field_or(form, "storyHighlight", "请基于主题创作精彩内容"),
    )
}

fn story_design_prompt(form: &FormData) -> String {
    format!(
        r#"角色：你是一位资深幼儿园教师,擅长设计富有教育意义的课程故事。

任务：根据以下信息,设计一份详细的"幼儿园课程故事设计方案"。

输入信息：
- 课程主题：{}
- 故事背景：{}
- 故事梗概：{}

输出要求：
1. **故事背景**：设置一个吸引幼儿的故事情境(100-150字)
2. **主要角色**：设计2-4个主要角色(每个角色50-80字)
   - 角色名称和特点
   - 角色在故事中的作用
3. **故事情节**：分阶段展开故事(600-800字)
   - 开端：问题或冲突的引入(150-200字)
   - 发展：角色们如何面对和解决(250-350字)
   - 高潮：最精彩或最紧张的部分(150-200字)
   - 结局：问题解决和收获(100-150字)
4. **教育价值**：
   - 涉及的五大领域发展目标(3-5条)
   - 培养的核心素养(3-4条)
5. **活动延伸建议**：提供2-3个相关延伸活动
6. **实施建议**：
   - 讲述技巧(3-4条)
   - 互动环节设计(2-3个)

格式要求：
- 使用清晰的Markdown格式
- 故事情节要生动有趣,符合幼儿认知水平
- 富有教育意义,但不说教
- 语言儿童化,易于理解"#,
        field(form, "designTheme"),
        field_or(form, "designBackground", "请根据主题创作合适的背景"),
        field_or(form, "designObjectives", "请根据主题设计吸引人的故事情节"),
    )
}

fn one_on_one_prompt(form: &FormData) -> String {
    format!(
        r#"角色：你是一位资深幼儿园教师,擅长进行一对一的儿童观察和倾听。

任务：根据以下信息,生成一份详细的"一对一倾听观察记录表"。

输入信息：
- 观察对象：{}
- 班级：{}
- 地点：{}
- 观察活动：{}
- 观察测试：{}

输出要求：
1. **基本信息**：
   - 观察对象、班级、地点、活动
   - 观察时间(建议填写)
   - 观察教师(建议填写)
2. **观察背景**：
   - 活动情境描述(80-120字)
   - 幼儿当时的状态(50-80字)
3. **倾听记录**：
   - 对话实录：记录师幼对话内容(200-300字)
     - 教师提问
     - 幼儿回应
     - 注意记录幼儿的原话和表达方式
   - 非言语表现：记录幼儿的表情、动作、情绪等(100-150字)
4. **倾听分析**：
   - 语言发展水平分析(100-150字)
   - 思维特点分析(100-150字)
   - 情感态度分析(80-120字)
5. **发展评估**：
   - 优势表现(2-3条)
   - 需要支持的方面(2-3条)
6. **教育建议**：
   - 家园共育建议(2-3条)
   - 后续观察重点(2-3条)

格式要求：
- 使用清晰的Markdown格式
- 对话记录要真实自然
- 分析专业,有依据
- 建议具体可操作"#,
        field(form, "oneObserver"),
        field(form, "oneGroup"),
        field(form, "onePlace"),
        field(form, "oneActivity"),
        field_or(form, "oneTest", "无特别说明"),
    )
}

/**
 * \brief 绘画风格，取值封闭。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawingStyle {
    ColoredPencil,
    Watercolor,
    PencilWatercolor,
    Monochrome,
}

impl DrawingStyle {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "彩铅" => Some(DrawingStyle::ColoredPencil),
            "水彩" => Some(DrawingStyle::Watercolor),
            "彩铅水彩混合" => Some(DrawingStyle::PencilWatercolor),
            "黑白" => Some(DrawingStyle::Monochrome),
            _ => None,
        }
    }

    fn phrase(&self) -> &'static str {
        match self {
            DrawingStyle::ColoredPencil => "彩色铅笔画",
            DrawingStyle::Watercolor => "水彩画",
            DrawingStyle::PencilWatercolor => "彩铅水彩混合风格",
            DrawingStyle::Monochrome => "纯黑白铅笔素描",
        }
    }
}

/**
 * \brief 线条粗细，取值封闭。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineWeight {
    Thick,
    Thin,
}

impl LineWeight {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "粗" => Some(LineWeight::Thick),
            "细" => Some(LineWeight::Thin),
            _ => None,
        }
    }

    fn phrase(&self) -> &'static str {
        match self {
            LineWeight::Thick => "粗线条",
            LineWeight::Thin => "细线条",
        }
    }
}

/** \brief 黑白风格追加的灰度约束 */
pub const MONOCHROME_INSTRUCTION: &str =
    "，画面只使用黑色和白色，不要任何彩色，纯黑白灰度图像，monochrome";

/**
 * \brief 组合风格、线条与画面描述，生成图像提示词。
 */
pub fn build_image_prompt(form: &FormData) -> String {
    let style = DrawingStyle::parse(field(form, "drawingStyle"));
    let line = LineWeight::parse(field(form, "drawingLine"));

    let style_phrase = style.map(|s| s.phrase()).unwrap_or("简笔画");
    let line_phrase = line.map(|l| l.phrase()).unwrap_or("中等线条");
    let color_instruction = if style == Some(DrawingStyle::Monochrome) {
        MONOCHROME_INSTRUCTION
    } else {
        ""
    };

    format!(
        "{}风格的儿童插画，{}，画面内容：{}{}。适合幼儿园教学使用，简洁清晰的构图，可爱友好的角色设计，白色背景，适合3-6岁幼儿。",
        style_phrase,
        line_phrase,
        field(form, "drawingDesc"),
        color_instruction
    )
}
