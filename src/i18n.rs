use std::collections::HashMap;

pub struct I18n {
    translations: HashMap<String, HashMap<String, String>>,
    current_lang: String,
}

impl I18n {
    pub fn new(lang: &str) -> Self {
        let mut translations = HashMap::new();

        // English
        let mut en = HashMap::new();
        // Banner and help
        en.insert("banner_title".to_string(), "Orbix — Offline Terminal AI Assistant".to_string());
        en.insert("banner_tagline".to_string(), "Fast • Private • Offline".to_string());
        en.insert("help_title".to_string(), "Orbix Commands".to_string());
        en.insert("help_section_general".to_string(), "General".to_string());
        en.insert("help_help".to_string(), "Show this help menu".to_string());
        en.insert("help_exit".to_string(), "Exit Orbix".to_string());
        en.insert("help_section_memory".to_string(), "Memory".to_string());
        en.insert("help_history".to_string(), "Show recent conversations".to_string());
        en.insert("help_showprefs".to_string(), "List saved preferences".to_string());
        en.insert("help_setpref".to_string(), "Save preference".to_string());
        en.insert("help_getpref".to_string(), "Retrieve preference".to_string());
        en.insert("help_section_ai".to_string(), "AI Usage".to_string());
        en.insert("help_ai_usage".to_string(), "Type any natural-language Linux request:".to_string());
        en.insert("help_ai_example_1".to_string(), "show disk usage".to_string());
        en.insert("help_ai_example_2".to_string(), "list large files".to_string());
        en.insert("help_ai_example_3".to_string(), "check memory usage".to_string());

        // Read-loop
        en.insert("prompt".to_string(), "orbix ❯ ".to_string());
        en.insert("goodbye".to_string(), "Goodbye from Orbix.".to_string());
        en.insert("interrupted".to_string(), "Interrupted. Type 'exit' to quit.".to_string());
        en.insert("recent_conversations".to_string(), "Recent Conversations".to_string());
        en.insert("no_conversations".to_string(), "No conversations yet".to_string());
        en.insert("preferences".to_string(), "Preferences".to_string());
        en.insert("no_preferences".to_string(), "No preferences saved".to_string());
        en.insert("pref_saved".to_string(), "Preference saved.".to_string());
        en.insert("setpref_usage".to_string(), "Usage: setpref <key> <value>".to_string());
        en.insert("getpref_usage".to_string(), "Usage: getpref <key>".to_string());
        en.insert("pref_not_set".to_string(), "Not set".to_string());

        // Turn output
        en.insert("label_command".to_string(), "Command:".to_string());
        en.insert("label_output".to_string(), "Output:".to_string());
        en.insert("label_explanation".to_string(), "Explanation:".to_string());
        en.insert("explain_prompt".to_string(), "Explain output? (y/n): ".to_string());
        en.insert("blocked_unsafe".to_string(), "⚠️ Blocked unsafe command (matched \"{0}\").".to_string());
        en.insert("generation_failed".to_string(), "Could not generate a command: {0}".to_string());
        en.insert("empty_generation".to_string(), "The model returned no usable command.".to_string());
        en.insert("timed_out".to_string(), "Command timed out after {0}s; output may be partial.".to_string());
        en.insert("record_failed".to_string(), "Warning: interaction not saved: {0}".to_string());
        en.insert("explain_failed".to_string(), "Could not explain the output: {0}".to_string());

        // Error messages
        en.insert("error_open_store".to_string(), "Failed to open memory database".to_string());
        en.insert("error_close_store".to_string(), "Failed to close memory database".to_string());
        en.insert("error_model_client".to_string(), "Failed to create model client".to_string());
        en.insert("error_read_input".to_string(), "Failed to read input".to_string());
        en.insert("error_line_editor".to_string(), "Failed to start line editor".to_string());
        en.insert("error_interrupt_handler".to_string(), "Failed to install Ctrl-C handler".to_string());

        // 中文
        let mut zh = HashMap::new();
        // Banner and help
        zh.insert("banner_title".to_string(), "Orbix — 离线终端 AI 助手".to_string());
        zh.insert("banner_tagline".to_string(), "快速 • 私密 • 离线".to_string());
        zh.insert("help_title".to_string(), "Orbix 命令".to_string());
        zh.insert("help_section_general".to_string(), "通用".to_string());
        zh.insert("help_help".to_string(), "显示帮助菜单".to_string());
        zh.insert("help_exit".to_string(), "退出 Orbix".to_string());
        zh.insert("help_section_memory".to_string(), "记忆".to_string());
        zh.insert("help_history".to_string(), "显示最近的对话".to_string());
        zh.insert("help_showprefs".to_string(), "列出已保存的偏好".to_string());
        zh.insert("help_setpref".to_string(), "保存偏好".to_string());
        zh.insert("help_getpref".to_string(), "读取偏好".to_string());
        zh.insert("help_section_ai".to_string(), "AI 用法".to_string());
        zh.insert("help_ai_usage".to_string(), "输入任意自然语言的 Linux 请求:".to_string());
        zh.insert("help_ai_example_1".to_string(), "显示磁盘使用情况".to_string());
        zh.insert("help_ai_example_2".to_string(), "列出大文件".to_string());
        zh.insert("help_ai_example_3".to_string(), "检查内存使用".to_string());

        // Read-loop
        zh.insert("prompt".to_string(), "orbix ❯ ".to_string());
        zh.insert("goodbye".to_string(), "Orbix 再见。".to_string());
        zh.insert("interrupted".to_string(), "已中断。输入 'exit' 退出。".to_string());
        zh.insert("recent_conversations".to_string(), "最近的对话".to_string());
        zh.insert("no_conversations".to_string(), "暂无对话记录".to_string());
        zh.insert("preferences".to_string(), "偏好设置".to_string());
        zh.insert("no_preferences".to_string(), "没有已保存的偏好".to_string());
        zh.insert("pref_saved".to_string(), "偏好已保存。".to_string());
        zh.insert("setpref_usage".to_string(), "用法: setpref <键> <值>".to_string());
        zh.insert("getpref_usage".to_string(), "用法: getpref <键>".to_string());
        zh.insert("pref_not_set".to_string(), "未设置".to_string());

        // Turn output
        zh.insert("label_command".to_string(), "命令:".to_string());
        zh.insert("label_output".to_string(), "输出:".to_string());
        zh.insert("label_explanation".to_string(), "解释:".to_string());
        zh.insert("explain_prompt".to_string(), "解释输出? (y/n): ".to_string());
        zh.insert("blocked_unsafe".to_string(), "⚠️ 已阻止不安全的命令 (匹配 \"{0}\")。".to_string());
        zh.insert("generation_failed".to_string(), "无法生成命令: {0}".to_string());
        zh.insert("empty_generation".to_string(), "模型没有返回可用的命令。".to_string());
        zh.insert("timed_out".to_string(), "命令在 {0} 秒后超时，输出可能不完整。".to_string());
        zh.insert("record_failed".to_string(), "警告: 对话未保存: {0}".to_string());
        zh.insert("explain_failed".to_string(), "无法解释输出: {0}".to_string());

        // Error messages
        zh.insert("error_open_store".to_string(), "打开记忆数据库失败".to_string());
        zh.insert("error_close_store".to_string(), "关闭记忆数据库失败".to_string());
        zh.insert("error_model_client".to_string(), "创建模型客户端失败".to_string());
        zh.insert("error_read_input".to_string(), "读取输入失败".to_string());
        zh.insert("error_line_editor".to_string(), "启动行编辑器失败".to_string());
        zh.insert("error_interrupt_handler".to_string(), "安装 Ctrl-C 处理器失败".to_string());

        translations.insert("en".to_string(), en);
        translations.insert("zh".to_string(), zh);

        // Resolve language - accept several code formats
        let effective_lang = if lang.starts_with("zh") || lang == "cn" || lang == "chinese" {
            "zh"
        } else {
            // Default to English
            "en"
        };

        Self {
            translations,
            current_lang: effective_lang.to_string(),
        }
    }

    pub fn t(&self, key: &str) -> String {
        if let Some(lang_map) = self.translations.get(&self.current_lang) {
            if let Some(value) = lang_map.get(key) {
                return value.clone();
            }
        }
        key.to_string()
    }

    pub fn t_format(&self, key: &str, args: &[&str]) -> String {
        let template = self.t(key);
        let mut result = template;
        for (i, arg) in args.iter().enumerate() {
            result = result.replace(&format!("{{{}}}", i), arg);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_language_codes() {
        assert_eq!(I18n::new("zh_CN").t("label_command"), "命令:");
        assert_eq!(I18n::new("en_US").t("label_command"), "Command:");
        assert_eq!(I18n::new("fr_FR").t("label_command"), "Command:");
    }

    #[test]
    fn missing_key_falls_back_to_key() {
        assert_eq!(I18n::new("en").t("no_such_key"), "no_such_key");
    }

    #[test]
    fn formats_positional_args() {
        let i18n = I18n::new("en");
        assert_eq!(i18n.t_format("timed_out", &["10"]), "Command timed out after 10s; output may be partial.");
    }

    #[test]
    fn both_languages_have_the_same_keys() {
        let i18n = I18n::new("en");
        let en = &i18n.translations["en"];
        let zh = &i18n.translations["zh"];
        for key in en.keys() {
            assert!(zh.contains_key(key), "zh is missing {key}");
        }
        assert_eq!(en.len(), zh.len());
    }
}
