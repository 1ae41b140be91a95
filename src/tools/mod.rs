//! Function-calling tool definitions for the maze game caller.
//!
//! These are the in-game effects the model may request by name; the game
//! client executes the returned invocations verbatim. Serialized in the
//! OpenAI tools format so the direct transport can attach them as-is.

use serde_json::{json, Value};

fn coordinate_pair(description: &str) -> Value {
    json!({
        "type": "array",
        "items": {"type": "integer"},
        "minItems": 2,
        "maxItems": 2,
        "description": description
    })
}

fn function_tool(name: &str, description: &str, parameters: Value) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": parameters
        }
    })
}

/// The full maze toolset, in the order the game documents them.
pub fn maze_game_tools() -> Vec<Value> {
    vec![
        function_tool(
            "break_wall",
            "Break a wall at the specified coordinates to create a path. \
             Use sparingly - limited breaks available.",
            json!({
                "type": "object",
                "properties": {
                    "x": {"type": "integer", "description": "X coordinate of the wall to break"},
                    "y": {"type": "integer", "description": "Y coordinate of the wall to break"}
                },
                "required": ["x", "y"]
            }),
        ),
        function_tool(
            "break_walls",
            "Break multiple walls at once. Each wall is specified as [x, y] coordinates.",
            json!({
                "type": "object",
                "properties": {
                    "walls": {
                        "type": "array",
                        "items": coordinate_pair("[x, y] coordinates of a wall to break"),
                        "description": "Array of [x, y] coordinates of walls to break"
                    }
                },
                "required": ["walls"]
            }),
        ),
        function_tool(
            "speed_boost",
            "Give the player a temporary speed boost for faster movement",
            json!({
                "type": "object",
                "properties": {
                    "duration_ms": {
                        "type": "integer",
                        "description": "Duration of speed boost in milliseconds",
                        "default": 1500
                    }
                }
            }),
        ),
        function_tool(
            "slow_germs",
            "Slow down germs (enemies) temporarily",
            json!({
                "type": "object",
                "properties": {
                    "duration_ms": {
                        "type": "integer",
                        "description": "Duration of slow effect in milliseconds",
                        "default": 3000
                    }
                }
            }),
        ),
        function_tool(
            "freeze_germs",
            "Freeze germs (enemies) completely for a duration",
            json!({
                "type": "object",
                "properties": {
                    "duration_ms": {
                        "type": "integer",
                        "description": "Duration of freeze effect in milliseconds",
                        "default": 3500
                    }
                }
            }),
        ),
        function_tool(
            "teleport_player",
            "Teleport the player to a specific location on the map",
            json!({
                "type": "object",
                "properties": {
                    "x": {"type": "integer", "description": "X coordinate to teleport to"},
                    "y": {"type": "integer", "description": "Y coordinate to teleport to"}
                },
                "required": ["x", "y"]
            }),
        ),
        function_tool(
            "spawn_oxygen",
            "Spawn oxygen pellets at specified locations for the player to collect",
            json!({
                "type": "object",
                "properties": {
                    "locations": {
                        "type": "array",
                        "items": coordinate_pair("[x, y] coordinates where oxygen should spawn"),
                        "description": "Array of [x, y] coordinates where oxygen should spawn"
                    }
                },
                "required": ["locations"]
            }),
        ),
        function_tool(
            "move_exit",
            "Move the exit/goal location to a new position",
            json!({
                "type": "object",
                "properties": {
                    "x": {"type": "integer", "description": "New X coordinate for exit"},
                    "y": {"type": "integer", "description": "New Y coordinate for exit"}
                },
                "required": ["x", "y"]
            }),
        ),
        function_tool(
            "highlight_zone",
            "Highlight a zone/area on the map to draw attention",
            json!({
                "type": "object",
                "properties": {
                    "cells": {
                        "type": "array",
                        "items": coordinate_pair("[x, y] coordinate of a cell to highlight"),
                        "description": "Array of [x, y] coordinates to highlight"
                    },
                    "duration_ms": {
                        "type": "integer",
                        "description": "How long to highlight in milliseconds",
                        "default": 5000
                    }
                }
            }),
        ),
        function_tool(
            "reveal_map",
            "Toggle map reveal to show/hide the entire map layout",
            json!({
                "type": "object",
                "properties": {
                    "enabled": {"type": "boolean", "description": "Whether to reveal the map"}
                },
                "required": ["enabled"]
            }),
        ),
    ]
}
