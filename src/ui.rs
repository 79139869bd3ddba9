use chrono::Local;
use gemini_chat::{Author, Severity};
use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
    Frame,
};

use crate::app::{App, InputMode};

const GREETING: &str = "Hello! I'm your AI assistant. How can I help you today?";

/// Parse a line of text and convert **bold** markdown to styled spans
fn parse_markdown_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut chars = text.chars().peekable();
    let mut current_text = String::new();

    while let Some(c) = chars.next() {
        if c != '*' || chars.peek() != Some(&'*') {
            current_text.push(c);
            continue;
        }
        chars.next(); // second *

        let mut bold_text = String::new();
        let mut found_close = false;
        while let Some(c) = chars.next() {
            if c == '*' && chars.peek() == Some(&'*') {
                chars.next();
                found_close = true;
                break;
            }
            bold_text.push(c);
        }

        if found_close && !bold_text.is_empty() {
            if !current_text.is_empty() {
                spans.push(Span::raw(std::mem::take(&mut current_text)));
            }
            spans.push(Span::styled(
                bold_text,
                Style::default().add_modifier(Modifier::BOLD),
            ));
        } else {
            // No closing **, treat as literal
            current_text.push_str("**");
            current_text.push_str(&bold_text);
            if found_close {
                current_text.push_str("**");
            }
        }
    }

    if !current_text.is_empty() {
        spans.push(Span::raw(current_text));
    }

    Line::from(spans)
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    let [header_area, chat_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_chat(app, frame, chat_area);
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);

    if app.show_api_key_input {
        render_api_key_input(app, frame, area);
    }
    render_toast(app, frame, chat_area);
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let key_status = if app.client.credential().is_some() {
        Span::styled(" key set ", Style::default().fg(Color::Green))
    } else {
        Span::styled(" no API key ", Style::default().fg(Color::Red))
    };

    let title = Line::from(vec![
        Span::styled(" AI Assistant ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(format!("{} ", app.model), Style::default().fg(Color::White)),
        key_status,
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    // Inner size minus borders, for scroll calculations
    app.chat_height = area.height.saturating_sub(2);
    app.chat_width = area.width.saturating_sub(2);

    let border_color = if app.input_mode == InputMode::Normal {
        Color::Cyan
    } else {
        Color::DarkGray
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(" Chat ");

    let text = if app.conversation.messages().is_empty() && !app.is_pending() {
        Text::from(Span::styled(GREETING, Style::default().fg(Color::DarkGray)))
    } else {
        let mut lines: Vec<Line> = Vec::new();

        for msg in app.conversation.messages() {
            let (label, color) = match msg.author() {
                Author::User => ("You", Color::Cyan),
                Author::Assistant => ("AI", Color::Yellow),
            };
            let time = msg.created_at().with_timezone(&Local).format("%H:%M");
            lines.push(Line::from(vec![
                Span::styled(
                    format!("{}:", label),
                    Style::default().fg(color).add_modifier(Modifier::BOLD),
                ),
                Span::styled(format!(" {}", time), Style::default().fg(Color::DarkGray)),
            ]));
            match msg.author() {
                Author::User => lines.extend(msg.text().lines().map(|l| Line::from(l.to_string()))),
                Author::Assistant => lines.extend(msg.text().lines().map(parse_markdown_line)),
            }
            lines.push(Line::default());
        }

        if app.is_pending() {
            lines.push(Line::from(Span::styled(
                "AI:",
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            )));
            // Animated ellipsis: cycles through ".", "..", "..."
            let dots = ".".repeat((app.animation_frame as usize) + 1);
            lines.push(Line::from(Span::styled(
                format!("Thinking{}", dots),
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
            )));
        }

        Text::from(lines)
    };

    let chat = Paragraph::new(text)
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((app.chat_scroll, 0));

    frame.render_widget(chat, area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let editing = app.input_mode == InputMode::Editing;
    let (title, border_color) = if app.is_pending() {
        (" Waiting for reply... ", Color::DarkGray)
    } else if editing {
        (" Message ", Color::Yellow)
    } else {
        (" Message (i to type) ", Color::DarkGray)
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    // Horizontal scroll keeps the cursor visible
    let inner_width = area.width.saturating_sub(2) as usize;
    let cursor_pos = app.input.cursor();
    let scroll_offset = if inner_width == 0 || cursor_pos < inner_width {
        0
    } else {
        cursor_pos - inner_width + 1
    };

    let visible_text: String = app
        .input
        .as_str()
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let input = if app.input.is_empty() && !editing {
        Paragraph::new("Type your message...").style(Style::default().fg(Color::DarkGray))
    } else {
        Paragraph::new(visible_text).style(Style::default().fg(Color::Cyan))
    }
    .block(block);

    frame.render_widget(input, area);

    if editing && !app.is_pending() && !app.show_api_key_input {
        let cursor_x = (cursor_pos - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let (mode_text, mode_style) = match app.input_mode {
        InputMode::Normal => (" NORMAL ", Style::default().bg(Color::Blue).fg(Color::White)),
        InputMode::Editing => (" INSERT ", Style::default().bg(Color::Yellow).fg(Color::Black)),
    };

    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let pairs: &[(&str, &str)] = if app.show_api_key_input {
        &[(" Enter ", " save key "), (" Esc ", " cancel ")]
    } else {
        match app.input_mode {
            InputMode::Editing => &[
                (" Enter ", " send "),
                (" PgUp/PgDn ", " scroll "),
                (" Esc ", " normal "),
            ],
            InputMode::Normal => &[
                (" j/k ", " scroll "),
                (" i ", " type "),
                (" K ", " API key "),
                (" x ", " dismiss "),
                (" q ", " quit "),
            ],
        }
    };

    let mut spans = vec![Span::styled(mode_text, mode_style), Span::raw(" ")];
    for (key, label) in pairs {
        spans.push(Span::styled(*key, key_style));
        spans.push(Span::styled(*label, label_style));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_api_key_input(app: &App, frame: &mut Frame, area: Rect) {
    let popup_width = 64.min(area.width.saturating_sub(4));
    let popup_height = 8;

    let popup_x = (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = (area.height.saturating_sub(popup_height)) / 2;
    let popup_area = Rect::new(popup_x, popup_y, popup_width, popup_height.min(area.height));

    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Configure Gemini API ");

    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);
    if inner.height < 5 {
        return;
    }

    let instructions = Paragraph::new(
        "Enter your Google Gemini API key. It is stored locally and never shared.",
    )
    .style(Style::default().fg(Color::DarkGray))
    .wrap(Wrap { trim: true });
    frame.render_widget(instructions, Rect::new(inner.x, inner.y, inner.width, 2));

    // Mask the key, showing only the last 4 chars
    let input_area = Rect::new(inner.x, inner.y + 3, inner.width, 1);
    let key = app.api_key_input.as_str();
    let len = app.api_key_input.char_count();
    let display_text = if len <= 4 {
        "*".repeat(len)
    } else {
        let last_four: String = key.chars().skip(len - 4).collect();
        format!("{}{}", "*".repeat(len - 4), last_four)
    };
    let visible: String = display_text
        .chars()
        .skip(len.saturating_sub(input_area.width as usize))
        .collect();
    frame.render_widget(
        Paragraph::new(visible).style(Style::default().fg(Color::Cyan)),
        input_area,
    );

    let cursor_x = app
        .api_key_input
        .cursor()
        .saturating_sub(len.saturating_sub(input_area.width as usize))
        .min(input_area.width.saturating_sub(1) as usize) as u16;
    frame.set_cursor_position((input_area.x + cursor_x, input_area.y));

    let status = Paragraph::new(format!(
        "{} characters. Get a key from Google AI Studio.",
        len
    ))
    .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(status, Rect::new(inner.x, inner.y + 4, inner.width, 1));
}

fn render_toast(app: &App, frame: &mut Frame, area: Rect) {
    let Some(toast) = app.current_toast() else {
        return;
    };

    let color = match toast.severity {
        Severity::Info => Color::Green,
        Severity::Warning => Color::Yellow,
        Severity::Error => Color::Red,
    };

    let width = 48.min(area.width.saturating_sub(2));
    let height = 4.min(area.height);
    if width < 4 || height < 3 {
        return;
    }
    let toast_area = Rect::new(area.x + area.width - width - 1, area.y + 1, width, height);

    frame.render_widget(Clear, toast_area);
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(color))
        .title(Span::styled(
            format!(" {} ", toast.title),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ));
    let body = Paragraph::new(toast.description.as_str())
        .block(block)
        .wrap(Wrap { trim: true });
    frame.render_widget(body, toast_area);
}
