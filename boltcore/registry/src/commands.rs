//! Runtime-extensible table of named builtins. The host registers its API
//! (graphics, audio, sprites, tilemaps, assets, ...) during startup; the
//! semantic analyzer and parser consult it for arity, parameter types, and
//! return types. Keys are canonical uppercase names.

use std::collections::HashMap;

use bolt_common::ReturnType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Statement-position builtin (`GFX_CLEAR`).
    Command,
    /// Expression-position builtin (`MOUSE_X()`).
    Function,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Int,
    Float,
    Str,
    Bool,
}

#[derive(Debug, Clone)]
pub struct ParamDef {
    pub name: String,
    pub ty: ParamType,
    pub optional: bool,
}

#[derive(Debug, Clone)]
pub struct CommandDef {
    pub name: String,
    pub category: String,
    pub kind: CommandKind,
    pub params: Vec<ParamDef>,
    pub return_type: ReturnType,
}

impl CommandDef {
    pub fn required_param_count(&self) -> usize {
        self.params.iter().filter(|p| !p.optional).count()
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    map: HashMap<String, CommandDef>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self { map: HashMap::new() }
    }

    pub fn register(&mut self, def: CommandDef) {
        self.map.insert(def.name.to_ascii_uppercase(), def);
    }

    pub fn get(&self, name: &str) -> Option<&CommandDef> {
        self.map.get(&name.to_ascii_uppercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(&name.to_ascii_uppercase())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandDef> {
        self.map.values()
    }

    /// A registry pre-populated with the host runtime's standard API surface.
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        register_host_api(&mut reg);
        reg
    }
}

fn def(
    name: &str,
    category: &str,
    kind: CommandKind,
    params: &[(&str, ParamType)],
    return_type: ReturnType,
) -> CommandDef {
    CommandDef {
        name: name.to_string(),
        category: category.to_string(),
        kind,
        params: params
            .iter()
            .map(|(n, t)| ParamDef { name: n.to_string(), ty: *t, optional: false })
            .collect(),
        return_type,
    }
}

fn cmd(name: &str, category: &str, params: &[(&str, ParamType)]) -> CommandDef {
    def(name, category, CommandKind::Command, params, ReturnType::Void)
}

fn func(name: &str, category: &str, params: &[(&str, ParamType)], ret: ReturnType) -> CommandDef {
    def(name, category, CommandKind::Function, params, ret)
}

/// The host runtime's builtin surface, mirroring the terminal/graphics/audio
/// API the generated programs call into.
pub fn register_host_api(reg: &mut CommandRegistry) {
    use ParamType::{Float, Int, Str};

    // Text layer
    reg.register(cmd("TEXT_CLEAR", "text", &[]));
    reg.register(cmd("TEXT_CLEAR_REGION", "text", &[("x", Int), ("y", Int), ("w", Int), ("h", Int)]));
    reg.register(cmd(
        "TEXT_PUT",
        "text",
        &[("x", Int), ("y", Int), ("text", Str), ("fg", Int), ("bg", Int)],
    ));
    reg.register(cmd(
        "TEXT_PUTCHAR",
        "text",
        &[("x", Int), ("y", Int), ("chr", Int), ("fg", Int), ("bg", Int)],
    ));
    reg.register(cmd("TEXT_SCROLL", "text", &[("lines", Int)]));
    reg.register(cmd("TEXT_SET_SIZE", "text", &[("width", Int), ("height", Int)]));
    reg.register(func("TEXT_GET_WIDTH", "text", &[], ReturnType::Int));
    reg.register(func("TEXT_GET_HEIGHT", "text", &[], ReturnType::Int));

    // Chunky pixel layer
    reg.register(cmd("CHUNKY_CLEAR", "chunky", &[("bg", Int)]));
    reg.register(cmd("CHUNKY_PSET", "chunky", &[("x", Int), ("y", Int), ("color", Int), ("bg", Int)]));
    reg.register(cmd(
        "CHUNKY_LINE",
        "chunky",
        &[("x1", Int), ("y1", Int), ("x2", Int), ("y2", Int), ("color", Int), ("bg", Int)],
    ));
    reg.register(cmd(
        "CHUNKY_RECT",
        "chunky",
        &[("x", Int), ("y", Int), ("w", Int), ("h", Int), ("color", Int), ("bg", Int)],
    ));
    reg.register(cmd(
        "CHUNKY_FILLRECT",
        "chunky",
        &[("x", Int), ("y", Int), ("w", Int), ("h", Int), ("color", Int), ("bg", Int)],
    ));
    reg.register(func("CHUNKY_GET_WIDTH", "chunky", &[], ReturnType::Int));
    reg.register(func("CHUNKY_GET_HEIGHT", "chunky", &[], ReturnType::Int));

    // Smooth graphics layer
    reg.register(cmd("GFX_CLEAR", "gfx", &[]));
    reg.register(cmd(
        "GFX_LINE",
        "gfx",
        &[("x1", Float), ("y1", Float), ("x2", Float), ("y2", Float), ("color", Int), ("thickness", Float)],
    ));
    reg.register(cmd("GFX_RECT", "gfx", &[("x", Float), ("y", Float), ("w", Float), ("h", Float), ("color", Int)]));
    reg.register(cmd("GFX_CIRCLE", "gfx", &[("x", Float), ("y", Float), ("radius", Float), ("color", Int)]));
    reg.register(cmd("GFX_POINT", "gfx", &[("x", Float), ("y", Float), ("color", Int)]));

    // Color utilities
    reg.register(func("COLOR_RGB", "color", &[("r", Int), ("g", Int), ("b", Int)], ReturnType::Int));
    reg.register(func("COLOR_RGBA", "color", &[("r", Int), ("g", Int), ("b", Int), ("a", Int)], ReturnType::Int));
    reg.register(func("COLOR_HSV", "color", &[("h", Float), ("s", Float), ("v", Float)], ReturnType::Int));

    // Frame sync and timing
    reg.register(cmd("FRAME_WAIT", "frame", &[]));
    reg.register(func("FRAME_COUNT", "frame", &[], ReturnType::Int));
    reg.register(func("TIME", "frame", &[], ReturnType::Float));
    reg.register(func("DELTA_TIME", "frame", &[], ReturnType::Float));

    // Random utilities
    reg.register(func("RANDOM", "random", &[], ReturnType::Float));
    reg.register(func("RANDOM_INT", "random", &[("min", Int), ("max", Int)], ReturnType::Int));
    reg.register(cmd("RANDOM_SEED", "random", &[("seed", Int)]));

    // Keyboard
    reg.register(func("KEY_PRESSED", "input", &[("keycode", Int)], ReturnType::Bool));
    reg.register(func("KEY_JUST_PRESSED", "input", &[("keycode", Int)], ReturnType::Bool));
    reg.register(func("KEY_JUST_RELEASED", "input", &[("keycode", Int)], ReturnType::Bool));
    reg.register(func("KEY_GET_CHAR", "input", &[], ReturnType::Int));
    reg.register(cmd("KEY_CLEAR_BUFFER", "input", &[]));

    // Mouse
    reg.register(func("MOUSE_X", "input", &[], ReturnType::Int));
    reg.register(func("MOUSE_Y", "input", &[], ReturnType::Int));
    reg.register(func("MOUSE_GRID_X", "input", &[], ReturnType::Int));
    reg.register(func("MOUSE_GRID_Y", "input", &[], ReturnType::Int));
    reg.register(func("MOUSE_BUTTON", "input", &[("button", Int)], ReturnType::Bool));
    reg.register(func("MOUSE_WHEEL_X", "input", &[], ReturnType::Float));
    reg.register(func("MOUSE_WHEEL_Y", "input", &[], ReturnType::Float));

    // Sprites
    reg.register(func("SPRITE_LOAD", "sprite", &[("filename", Str)], ReturnType::Int));
    reg.register(func("SPRITE_LOAD_BUILTIN", "sprite", &[("name", Str)], ReturnType::Int));
    reg.register(cmd("SPRITE_SHOW", "sprite", &[("id", Int), ("x", Float), ("y", Float)]));
    reg.register(cmd("SPRITE_HIDE", "sprite", &[("id", Int)]));
    reg.register(cmd(
        "SPRITE_TRANSFORM",
        "sprite",
        &[("id", Int), ("x", Float), ("y", Float), ("rot", Float), ("sx", Float), ("sy", Float)],
    ));
    reg.register(cmd("SPRITE_TINT", "sprite", &[("id", Int), ("color", Int)]));
    reg.register(cmd("SPRITE_UNLOAD", "sprite", &[("id", Int)]));

    // Layers and display
    reg.register(cmd("LAYER_SET_VISIBLE", "layer", &[("layer", Int), ("visible", Int)]));
    reg.register(cmd("LAYER_SET_ALPHA", "layer", &[("layer", Int), ("alpha", Float)]));
    reg.register(cmd("LAYER_SET_ORDER", "layer", &[("layer", Int), ("order", Int)]));
    reg.register(func("DISPLAY_WIDTH", "display", &[], ReturnType::Int));
    reg.register(func("DISPLAY_HEIGHT", "display", &[], ReturnType::Int));
    reg.register(func("CELL_WIDTH", "display", &[], ReturnType::Int));
    reg.register(func("CELL_HEIGHT", "display", &[], ReturnType::Int));

    // Sound and synthesis
    reg.register(func("SOUND_LOAD", "audio", &[("filename", Str)], ReturnType::Int));
    reg.register(func("SOUND_LOAD_BUILTIN", "audio", &[("name", Str)], ReturnType::Int));
    reg.register(cmd("SOUND_PLAY", "audio", &[("id", Int), ("volume", Float)]));
    reg.register(cmd("SOUND_STOP", "audio", &[("id", Int)]));
    reg.register(cmd("SOUND_UNLOAD", "audio", &[("id", Int)]));
    reg.register(cmd("SYNTH_NOTE", "audio", &[("note", Int), ("duration", Float), ("volume", Float)]));
    reg.register(cmd("SYNTH_FREQUENCY", "audio", &[("freq", Float), ("duration", Float), ("volume", Float)]));
    reg.register(cmd("SYNTH_SET_INSTRUMENT", "audio", &[("instrument", Int)]));

    // Tilemaps
    reg.register(func("TILEMAP_INIT", "tilemap", &[("viewport_w", Int), ("viewport_h", Int)], ReturnType::Bool));
    reg.register(cmd("TILEMAP_SHUTDOWN", "tilemap", &[]));
    reg.register(func(
        "TILEMAP_CREATE",
        "tilemap",
        &[("w", Int), ("h", Int), ("tile_w", Int), ("tile_h", Int)],
        ReturnType::Int,
    ));
    reg.register(cmd("TILEMAP_DESTROY", "tilemap", &[("id", Int)]));
    reg.register(func(
        "TILESET_LOAD",
        "tilemap",
        &[("path", Str), ("tw", Int), ("th", Int), ("margin", Int), ("spacing", Int)],
        ReturnType::Int,
    ));
    reg.register(cmd("TILEMAP_SET_TILE", "tilemap", &[("layer", Int), ("x", Int), ("y", Int), ("tile", Int)]));
    reg.register(func("TILEMAP_GET_TILE", "tilemap", &[("layer", Int), ("x", Int), ("y", Int)], ReturnType::Int));
    reg.register(cmd("TILEMAP_SET_CAMERA", "tilemap", &[("x", Float), ("y", Float)]));
    reg.register(func("TILEMAP_GET_CAMERA_X", "tilemap", &[], ReturnType::Float));
    reg.register(func("TILEMAP_GET_CAMERA_Y", "tilemap", &[], ReturnType::Float));
    reg.register(cmd("TILEMAP_UPDATE", "tilemap", &[("delta_time", Float)]));

    // Particles
    reg.register(func("PARTICLE_INIT", "particle", &[("max_particles", Int)], ReturnType::Bool));
    reg.register(cmd("PARTICLE_SHUTDOWN", "particle", &[]));
    reg.register(func(
        "PARTICLE_EXPLODE",
        "particle",
        &[("x", Float), ("y", Float), ("count", Int), ("color", Int)],
        ReturnType::Bool,
    ));
    reg.register(cmd("PARTICLE_CLEAR", "particle", &[]));
    reg.register(func("PARTICLE_GET_COUNT", "particle", &[], ReturnType::Int));

    // Asset management
    reg.register(func("ASSET_INIT", "asset", &[("db_path", Str), ("max_cache", Int)], ReturnType::Bool));
    reg.register(cmd("ASSET_SHUTDOWN", "asset", &[]));
    reg.register(func("ASSET_LOAD", "asset", &[("name", Str)], ReturnType::Int));
    reg.register(cmd("ASSET_UNLOAD", "asset", &[("id", Int)]));
    reg.register(func("ASSET_EXISTS", "asset", &[("name", Str)], ReturnType::Bool));
    reg.register(func("ASSET_GET_NAME", "asset", &[("id", Int)], ReturnType::Str));
    reg.register(func("ASSET_GET_ERROR", "asset", &[], ReturnType::Str));

    // Terminal conveniences usable as bare statements
    reg.register(cmd("CLS", "terminal", &[]));
    reg.register(cmd("HOME", "terminal", &[]));
    reg.register(cmd("BEEP", "terminal", &[]));
    reg.register(cmd("COLOR_RESET", "terminal", &[]));
    reg.register(cmd("CURSOR_HIDE", "terminal", &[]));
    reg.register(cmd("CURSOR_SHOW", "terminal", &[]));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let reg = CommandRegistry::with_defaults();
        assert!(reg.contains("gfx_line"));
        assert!(reg.contains("GFX_LINE"));
        let d = reg.get("Gfx_Line").unwrap();
        assert_eq!(d.param_count(), 6);
        assert_eq!(d.return_type, ReturnType::Void);
        assert_eq!(d.kind, CommandKind::Command);
    }

    #[test]
    fn function_entries_carry_return_types() {
        let reg = CommandRegistry::with_defaults();
        assert_eq!(reg.get("MOUSE_X").unwrap().return_type, ReturnType::Int);
        assert_eq!(reg.get("TIME").unwrap().return_type, ReturnType::Float);
        assert_eq!(reg.get("ASSET_GET_NAME").unwrap().return_type, ReturnType::Str);
        assert_eq!(reg.get("KEY_PRESSED").unwrap().return_type, ReturnType::Bool);
    }

    #[test]
    fn host_can_extend() {
        let mut reg = CommandRegistry::with_defaults();
        let before = reg.len();
        reg.register(CommandDef {
            name: "VOICE_SPEAK".to_string(),
            category: "voice".to_string(),
            kind: CommandKind::Command,
            params: vec![ParamDef { name: "text".to_string(), ty: ParamType::Str, optional: false }],
            return_type: ReturnType::Void,
        });
        assert_eq!(reg.len(), before + 1);
        assert!(reg.contains("voice_speak"));
    }
}
