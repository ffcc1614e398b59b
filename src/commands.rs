/// Commands of the interactive browser and prefix/alias resolution

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub usage: &'static str,
  pub description: &'static str,
}

/// All available commands
pub const COMMANDS: &[Command] = &[
  Command {
    name: "category",
    aliases: &["c", "cat", "filter"],
    usage: ":category monster|spell|trap|all",
    description: "Show only one kind of card",
  },
  Command {
    name: "refresh",
    aliases: &["r", "reload"],
    usage: ":refresh",
    description: "Reload the sheet past every cache",
  },
  Command {
    name: "show",
    aliases: &["s", "view"],
    usage: ":show <id>",
    description: "Print every field of a card",
  },
  Command {
    name: "values",
    aliases: &["v", "options"],
    usage: ":values <field>",
    description: "List values already used for a field, plus common ones",
  },
  Command {
    name: "new",
    aliases: &["n", "add"],
    usage: ":new",
    description: "Start a new card",
  },
  Command {
    name: "edit",
    aliases: &["e", "open"],
    usage: ":edit <id>",
    description: "Open a card for editing",
  },
  Command {
    name: "duplicate",
    aliases: &["d", "dup", "copy"],
    usage: ":duplicate",
    description: "Turn the open card into a new copy",
  },
  Command {
    name: "set",
    aliases: &["let"],
    usage: ":set key=value",
    description: "Change a field of the open card",
  },
  Command {
    name: "save",
    aliases: &["w", "write"],
    usage: ":save",
    description: "Save the open card",
  },
  Command {
    name: "cancel",
    aliases: &["close", "discard"],
    usage: ":cancel",
    description: "Close the open card without saving",
  },
  Command {
    name: "offline",
    aliases: &["down"],
    usage: ":offline",
    description: "Treat the connection as down",
  },
  Command {
    name: "online",
    aliases: &["up"],
    usage: ":online",
    description: "Treat the connection as up",
  },
  Command {
    name: "status",
    aliases: &["st"],
    usage: ":status",
    description: "Where the shown data came from",
  },
  Command {
    name: "help",
    aliases: &["h", "?"],
    usage: ":help",
    description: "List commands",
  },
  Command {
    name: "quit",
    aliases: &["q", "exit"],
    usage: ":quit",
    description: "Exit cardshelf",
  },
];

/// Get autocomplete suggestions for a given input
pub fn get_suggestions(input: &str) -> Vec<&'static Command> {
  let input_lower = input.trim().to_lowercase();

  if input_lower.is_empty() {
    return COMMANDS.iter().collect();
  }

  let mut matches: Vec<(&Command, u32)> = Vec::new();

  for cmd in COMMANDS {
    if cmd.name == input_lower {
      matches.push((cmd, 0));
    } else if cmd.aliases.contains(&input_lower.as_str()) {
      matches.push((cmd, 1));
    } else if cmd.name.starts_with(&input_lower) {
      matches.push((cmd, 2));
    } else if cmd.aliases.iter().any(|a| a.starts_with(&input_lower)) {
      matches.push((cmd, 3));
    }
  }

  // Stable, so table order breaks ties
  matches.sort_by_key(|(_, priority)| *priority);

  matches.into_iter().map(|(cmd, _)| cmd).collect()
}

/// Split `:edit c12` into the best matching command and its argument text.
///
/// Returns `None` when the word matches no command.
pub fn parse(line: &str) -> Option<(&'static Command, String)> {
  let line = line.trim().trim_start_matches(':');
  let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
  if word.is_empty() {
    return None;
  }

  get_suggestions(word)
    .into_iter()
    .next()
    .map(|cmd| (cmd, rest.trim().to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_input_returns_all() {
    let suggestions = get_suggestions("");
    assert_eq!(suggestions.len(), COMMANDS.len());
  }

  #[test]
  fn test_exact_match_beats_prefix() {
    // "s" is an alias of show, and a prefix of set, save and status
    let suggestions = get_suggestions("s");
    assert_eq!(suggestions[0].name, "show");
    assert!(suggestions.iter().any(|c| c.name == "save"));
  }

  #[test]
  fn test_prefix_match() {
    let suggestions = get_suggestions("dup");
    assert_eq!(suggestions[0].name, "duplicate");
    assert_eq!(get_suggestions("ref")[0].name, "refresh");
  }

  #[test]
  fn test_parse_splits_argument() {
    let (cmd, args) = parse(":edit  card_k2x_ab12cd ").unwrap();
    assert_eq!(cmd.name, "edit");
    assert_eq!(args, "card_k2x_ab12cd");

    let (cmd, args) = parse(":set name=Dark Magician").unwrap();
    assert_eq!(cmd.name, "set");
    assert_eq!(args, "name=Dark Magician");

    let (cmd, args) = parse(":v rarity").unwrap();
    assert_eq!(cmd.name, "values");
    assert_eq!(args, "rarity");

    let (cmd, args) = parse(":q").unwrap();
    assert_eq!(cmd.name, "quit");
    assert!(args.is_empty());
  }

  #[test]
  fn test_parse_unknown_or_empty() {
    assert!(parse(":zzz").is_none());
    assert!(parse(":").is_none());
  }
}
