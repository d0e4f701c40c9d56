use std::fmt;

use serde::{Deserialize, Serialize};

use crate::events::{EventSink, KindSource, ReportEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ToggleKind {
    WaffleFlag,
    WaffleSwitch,
    CourseWaffleFlag,
    SettingToggle,
    SettingDictToggle,
    Unknown,
}

impl ToggleKind {
    pub const ALL: [ToggleKind; 6] = [
        ToggleKind::WaffleFlag,
        ToggleKind::WaffleSwitch,
        ToggleKind::CourseWaffleFlag,
        ToggleKind::SettingToggle,
        ToggleKind::SettingDictToggle,
        ToggleKind::Unknown,
    ];

    /// Strict lookup: accepts canonical names, dump model names and the
    /// category keys of the toggle state report.
    pub fn from_name(raw: &str) -> Option<Self> {
        match raw.trim() {
            "WaffleFlag" | "waffle.flag" | "waffle_flag" | "waffle_flags" => {
                Some(ToggleKind::WaffleFlag)
            }
            "WaffleSwitch" | "waffle.switch" | "waffle_switch" | "waffle_switches" => {
                Some(ToggleKind::WaffleSwitch)
            }
            "CourseWaffleFlag"
            | "waffle_utils.waffleflagcourseoverridemodel"
            | "waffle_utils_waffleflagcourseoverridemodel"
            | "course_waffle_flags" => Some(ToggleKind::CourseWaffleFlag),
            "SettingToggle" | "DjangoSetting" | "django_settings" => {
                Some(ToggleKind::SettingToggle)
            }
            "SettingDictToggle" => Some(ToggleKind::SettingDictToggle),
            "Unknown" => Some(ToggleKind::Unknown),
            _ => None,
        }
    }

    /// Lenient lookup used on external input: unrecognized names become
    /// `Unknown` and are reported to the sink.
    pub fn normalize(raw: &str, source: KindSource, sink: &dyn EventSink) -> Self {
        match Self::from_name(raw) {
            Some(kind) => kind,
            None => {
                sink.emit(ReportEvent::UnknownKind {
                    raw: raw.to_string(),
                    source,
                });
                ToggleKind::Unknown
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToggleKind::WaffleFlag => "WaffleFlag",
            ToggleKind::WaffleSwitch => "WaffleSwitch",
            ToggleKind::CourseWaffleFlag => "CourseWaffleFlag",
            ToggleKind::SettingToggle => "SettingToggle",
            ToggleKind::SettingDictToggle => "SettingDictToggle",
            ToggleKind::Unknown => "Unknown",
        }
    }

    pub fn is_flag_family(&self) -> bool {
        matches!(self, ToggleKind::WaffleFlag | ToggleKind::CourseWaffleFlag)
    }
}

impl fmt::Display for ToggleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
