//! Travel and clothing advisory rules.
//!
//! The same band tables feed two consumers: [`rules_prompt`] renders them as
//! the prose the model is instructed to follow, and [`advise`] applies them
//! deterministically to a single weather reading.

/// One weather reading, as reported by the weather tool.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherSnapshot {
    /// Degrees Celsius.
    pub temperature: f64,
    /// Beaufort wind level.
    pub wind_level: u32,
    /// Relative humidity in percent.
    pub humidity: u32,
    /// Free-form phenomenon, e.g. "多云" or "light rain".
    pub phenomenon: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureBand {
    SevereCold,
    Cold,
    Cool,
    Mild,
    Hot,
    Scorching,
}

impl TemperatureBand {
    pub const ALL: [TemperatureBand; 6] = [
        Self::SevereCold,
        Self::Cold,
        Self::Cool,
        Self::Mild,
        Self::Hot,
        Self::Scorching,
    ];

    /// Upper bounds are inclusive, so whole-degree readings land in the
    /// `≤0`, `1~10`, `11~18`, `19~25`, `26~32`, `≥33` ranges.
    pub fn classify(celsius: f64) -> Self {
        if celsius <= 0.0 {
            Self::SevereCold
        } else if celsius <= 10.0 {
            Self::Cold
        } else if celsius <= 18.0 {
            Self::Cool
        } else if celsius <= 25.0 {
            Self::Mild
        } else if celsius <= 32.0 {
            Self::Hot
        } else {
            Self::Scorching
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::SevereCold => "严寒",
            Self::Cold => "寒冷",
            Self::Cool => "凉爽",
            Self::Mild => "适宜",
            Self::Hot => "炎热",
            Self::Scorching => "酷热",
        }
    }

    pub fn range(self) -> &'static str {
        match self {
            Self::SevereCold => "≤0℃",
            Self::Cold => "1~10℃",
            Self::Cool => "11~18℃",
            Self::Mild => "19~25℃",
            Self::Hot => "26~32℃",
            Self::Scorching => "≥33℃",
        }
    }

    pub fn advice(self) -> &'static str {
        match self {
            Self::SevereCold => "穿羽绒服+厚毛衣+加绒裤+雪地靴，佩戴围巾、手套、帽子，注意防冻伤",
            Self::Cold => "穿厚外套（呢大衣/冲锋衣）+ 毛衣+保暖裤+棉鞋，室内外温差大，建议洋葱式穿衣（方便增减）",
            Self::Cool => "穿薄外套（风衣/夹克）+ 长袖T恤/针织衫+长裤+单鞋，早晚偏凉可加围巾",
            Self::Mild => "穿短袖T恤/薄针织衫+长裤/短裙+帆布鞋，舒适度高，无需额外保暖",
            Self::Hot => "穿短袖+短裤/短裙+凉鞋，注意防晒（涂防晒霜、戴帽子），补充水分",
            Self::Scorching => "穿透气浅色短袖+短裤+凉拖，避免正午高温时段外出，谨防中暑",
        }
    }

    fn is_extreme(self) -> bool {
        self == Self::Scorching
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindBand {
    Light,
    Moderate,
    Strong,
}

impl WindBand {
    pub const ALL: [WindBand; 3] = [Self::Light, Self::Moderate, Self::Strong];

    pub fn classify(level: u32) -> Self {
        match level {
            0..=3 => Self::Light,
            4..=5 => Self::Moderate,
            _ => Self::Strong,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Light => "微风",
            Self::Moderate => "和风",
            Self::Strong => "大风",
        }
    }

    pub fn range(self) -> &'static str {
        match self {
            Self::Light => "≤3级",
            Self::Moderate => "4~5级",
            Self::Strong => "≥6级",
        }
    }

    pub fn advice(self) -> &'static str {
        match self {
            Self::Light => "无特殊影响，正常出行",
            Self::Moderate => "穿防风外套，长发建议扎起，户外搭建物（如帐篷）需加固",
            Self::Strong => "尽量减少外出，如需出行穿防风性能好的衣物，远离广告牌、大树等易被吹倒物体",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HumidityBand {
    High,
    Low,
}

impl HumidityBand {
    pub const ALL: [HumidityBand; 2] = [Self::High, Self::Low];

    /// `None` for the comfortable 31–69% range, which gets no advice.
    pub fn classify(percent: u32) -> Option<Self> {
        match percent {
            70.. => Some(Self::High),
            0..=30 => Some(Self::Low),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::High => "高湿",
            Self::Low => "低湿",
        }
    }

    pub fn range(self) -> &'static str {
        match self {
            Self::High => "≥70%",
            Self::Low => "≤30%",
        }
    }

    pub fn advice(self) -> &'static str {
        match self {
            Self::High => "穿透气吸汗的衣物，南方梅雨季注意防潮，关节不适者需保暖",
            Self::Low => "多喝水补充水分，涂抹保湿霜，呼吸道敏感者可佩戴口罩",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phenomenon {
    SunnyOrCloudy,
    Rain { severe: bool },
    Snow { severe: bool },
    FogOrHaze,
    Thunderstorm,
}

impl Phenomenon {
    pub const ALL: [Phenomenon; 5] = [
        Self::SunnyOrCloudy,
        Self::Rain { severe: false },
        Self::Snow { severe: false },
        Self::FogOrHaze,
        Self::Thunderstorm,
    ];

    /// Keyword match on Chinese or English descriptions. Thunderstorms are
    /// checked before rain, snow before rain (sleet counts as snow).
    pub fn classify(description: &str) -> Option<Self> {
        let d = description.to_lowercase();
        let has = |keys: &[&str]| keys.iter().any(|k| d.contains(k));

        if has(&["雷", "thunder"]) {
            Some(Self::Thunderstorm)
        } else if has(&["雪", "snow", "sleet"]) {
            Some(Self::Snow {
                severe: has(&["暴雪", "大雪", "blizzard", "heavy snow"]),
            })
        } else if has(&["雨", "rain", "drizzle", "shower"]) {
            Some(Self::Rain {
                severe: has(&["暴雨", "rainstorm", "torrential"]),
            })
        } else if has(&["雾", "霾", "fog", "haze", "mist", "smog"]) {
            Some(Self::FogOrHaze)
        } else if has(&["晴", "多云", "sunny", "clear", "cloudy"]) {
            Some(Self::SunnyOrCloudy)
        } else {
            None
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::SunnyOrCloudy => "晴/多云",
            Self::Rain { .. } => "雨（小雨/中雨/大雨）",
            Self::Snow { .. } => "雪（小雪/中雪/大雪）",
            Self::FogOrHaze => "雾/霾",
            Self::Thunderstorm => "雷阵雨",
        }
    }

    pub fn advice(self) -> &'static str {
        match self {
            Self::SunnyOrCloudy => "做好防晒（SPF30+防晒霜、遮阳帽），长时间户外建议携带遮阳伞",
            Self::Rain { .. } => "携带折叠伞或穿雨衣，穿防滑鞋，注意路面湿滑；暴雨天气避免低洼路段出行",
            Self::Snow { .. } => "穿防水防滑雪地靴，佩戴防雪镜，驾车减速慢行，注意道路结冰",
            Self::FogOrHaze => "能见度低，驾车开启雾灯、保持车距；霾天佩戴N95口罩，减少户外停留时间",
            Self::Thunderstorm => "避免在户外逗留，远离大树、电线杆等高大物体，不使用金属雨伞",
        }
    }

    fn is_extreme(self) -> bool {
        matches!(
            self,
            Self::Rain { severe: true } | Self::Snow { severe: true }
        )
    }
}

/// Bands selected for one reading.
#[derive(Debug, Clone, PartialEq)]
pub struct Advisory {
    pub temperature: TemperatureBand,
    pub wind: WindBand,
    pub humidity: Option<HumidityBand>,
    pub phenomenon: Option<Phenomenon>,
}

impl Advisory {
    /// Whether any factor counts as extreme weather (rainstorm, blizzard,
    /// strong wind, heat).
    pub fn is_extreme(&self) -> bool {
        self.temperature.is_extreme()
            || self.wind == WindBand::Strong
            || self.phenomenon.is_some_and(Phenomenon::is_extreme)
    }

    /// Advisory bullet lines. Extreme factors come first.
    pub fn lines(&self) -> Vec<String> {
        let mut lines: Vec<(bool, String)> = Vec::new();

        if let Some(p) = self.phenomenon {
            lines.push((p.is_extreme(), format!("• {}：{}", p.label(), p.advice())));
        }
        lines.push((
            self.wind == WindBand::Strong,
            format!(
                "• {}（{}）：{}",
                self.wind.label(),
                self.wind.range(),
                self.wind.advice()
            ),
        ));
        lines.push((
            self.temperature.is_extreme(),
            format!(
                "• {}（{}）：{}",
                self.temperature.label(),
                self.temperature.range(),
                self.temperature.advice()
            ),
        ));
        if let Some(h) = self.humidity {
            lines.push((false, format!("• {}（{}）：{}", h.label(), h.range(), h.advice())));
        }

        // Stable sort keeps the clothing-first order among ordinary lines.
        lines.sort_by_key(|(extreme, _)| !extreme);
        lines.into_iter().map(|(_, line)| line).collect()
    }

    pub fn render(&self) -> String {
        self.lines().join("\n")
    }
}

pub fn advise(snapshot: &WeatherSnapshot) -> Advisory {
    Advisory {
        temperature: TemperatureBand::classify(snapshot.temperature),
        wind: WindBand::classify(snapshot.wind_level),
        humidity: HumidityBand::classify(snapshot.humidity),
        phenomenon: Phenomenon::classify(&snapshot.phenomenon),
    }
}

fn render_rule_list<T: Copy>(items: &[T], line: impl Fn(T) -> String) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let end = if i + 1 == items.len() { "。" } else { "；" };
            format!("- {}{end}", line(*item))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// The advisory rule table as prompt prose.
pub fn rules_prompt() -> String {
    let temperature = render_rule_list(&TemperatureBand::ALL, |b| {
        format!("{}（{}）：{}", b.label(), b.range(), b.advice())
    });
    let wind = render_rule_list(&WindBand::ALL, |b| {
        format!("{}（{}）：{}", b.label(), b.range(), b.advice())
    });
    let humidity = render_rule_list(&HumidityBand::ALL, |b| {
        format!("{}（{}）：{}", b.label(), b.range(), b.advice())
    });
    let phenomenon = render_rule_list(&Phenomenon::ALL, |p| {
        format!("{}：{}", p.label(), p.advice())
    });

    format!(
        "（1）温度分档穿衣建议：\n{temperature}\n\n\
         （2）风力专项建议：\n{wind}\n\n\
         （3）湿度专项建议：\n{humidity}\n\n\
         （4）天气现象专项建议：\n{phenomenon}\n\n\
         （5）综合建议优先级：\n\
         - 极端天气（暴雨、暴雪、大风、高温）优先提示安全风险（如「避免外出」「谨防中暑」）；\n\
         - 多重因素叠加（如「10℃+5级风+60%湿度」）：综合给出建议（如「穿厚外套+防风围巾，保持衣物透气」）；\n\
         - 未来几天有降雨/降温：提前提醒（如「明日有雨，建议随身携带雨具；后天降温5℃，需增加衣物」）。"
    )
}
