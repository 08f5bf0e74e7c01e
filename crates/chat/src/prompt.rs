use grimoire_config::AssistantConfig;

/// Game details woven into the system prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptContext {
    pub game_master_name: String,
    pub player_level: u8,
    pub campaign_setting: String,
}

impl From<&AssistantConfig> for PromptContext {
    fn from(cfg: &AssistantConfig) -> Self {
        Self {
            game_master_name: cfg.game_master_name.clone(),
            player_level: cfg.player_level,
            campaign_setting: cfg.campaign_setting.clone(),
        }
    }
}

pub fn build_system_prompt(ctx: &PromptContext) -> String {
    format!(
        "You are a helpful Dungeons & Dragons 5th Edition assistant. Your purpose is to help \
         players and Dungeon Masters understand game rules, mechanics, and provide guidance \
         on various aspects of the game.\n\n\
         Available tools:\n\
         - search_rules: Search the D&D 5e rulebooks for specific rules, spells, items, or mechanics\n\n\
         IMPORTANT INSTRUCTIONS:\n\
         1. When a user asks about ANY rule, race, class, spell, item, or mechanic, you MUST use search_rules tool first\n\
         2. Always mention the specific names of rules, races, classes, spells, items, or monsters in your answers\n\
         3. Be specific and accurate with rule names\n\n\
         Context information:\n\
         Campaign Setting: {setting}\n\
         Player Level: {level}\n\
         Game Master: {gm}\n\n\
         Begin by greeting the user and asking how you can help with their D&D game.",
        setting = ctx.campaign_setting,
        level = ctx.player_level,
        gm = ctx.game_master_name,
    )
}
