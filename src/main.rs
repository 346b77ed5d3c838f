use anyhow::Result;
use chrono::{Days, Local};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, MouseButton, MouseEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Cell, Chart, Clear, Dataset, GraphType, Paragraph, Row, Table, TableState, Wrap},
    Frame, Terminal,
};
use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
    fs, io,
    sync::mpsc::{self, Receiver, Sender},
    thread,
    time::{Duration, Instant},
};

const DEFAULT_API_URL: &str = "http://127.0.0.1:5000";
const REQUEST_TIMEOUT_SECS: u64 = 10;
const SEARCH_DEBOUNCE_MS: u64 = 300;
const MIN_SEARCH_LEN: usize = 2;
const NOTIFICATION_SECS: u64 = 5;
const MAX_CATEGORY_CHIPS: usize = 8;
const OTHER_CATEGORY_ID: &str = "other";
const TOOLTIP_OFFSET_X: u16 = 2;
const TOOLTIP_OFFSET_Y: u16 = 1;
const PURCHASE_PRESETS: &[u32] = &[10, 50, 100, 500];

/// Message sent from a background fetch thread to the main thread
#[derive(Debug)]
enum FetchMessage {
    /// Full coin list for the dashboard table
    Coins(Vec<Token>),
    /// Trend classification codes, applied to loaded rows
    Trends(Vec<TrendUpdate>),
    /// Outcome of a favorite toggle; `ok == false` rolls the row back
    FavouriteToggled { coin_id: String, ok: bool, message: String },
    /// Token search results, tagged so stale responses can be discarded
    SearchResults { seq: u64, tokens: Vec<Token> },
    CoinDetails(Box<CoinDetails>),
    Portfolios(Vec<Portfolio>),
    PortfolioCreated(String),
    PricesUpdated(u32),
    PurchasesSaved(String),
    FavouritesAdded(String),
    Performance(Vec<PerfPoint>),
    Composition(Vec<CompositionSlice>),
    Error(String),
}

#[derive(Clone, Debug, Deserialize)]
struct Token {
    id: String,
    name: String,
    symbol: String,
    #[serde(default)]
    cmc_rank: Option<u32>,
    #[serde(default)]
    price_usd: Option<f64>,
    #[serde(default)]
    volume_24h: Option<f64>,
    #[serde(default)]
    percent_change_24h: Option<f64>,
    #[serde(default)]
    category_ids: Vec<String>,
    #[serde(default)]
    categories: Option<String>,
    #[serde(default)]
    about_what: Option<i64>,
    #[serde(default)]
    is_favourite: bool,
}

#[derive(Deserialize)]
struct TokensResponse {
    tokens: Vec<Token>,
}

#[derive(Deserialize)]
struct ToggleFavouriteResponse {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct AddFavouritesResponse {
    success: bool,
    #[serde(default)]
    message: String,
}

#[derive(Clone, Debug, Deserialize)]
struct TrendUpdate {
    coin_id: String,
    #[serde(default)]
    about_what: Option<i64>,
}

#[derive(Deserialize)]
struct TrendsResponse {
    trends: Vec<TrendUpdate>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct CoinDetails {
    #[serde(default)]
    name: String,
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    market_cap: Option<f64>,
    #[serde(default)]
    market_cap_rank: Option<u32>,
    #[serde(default)]
    total_volume_usd: Option<f64>,
    #[serde(default)]
    current_price_usd: Option<f64>,
    #[serde(default)]
    percent_change_1h: Option<f64>,
    #[serde(default)]
    price_change_percentage_24h: Option<f64>,
    #[serde(default)]
    percent_change_7d: Option<f64>,
    #[serde(default)]
    percent_change_30d: Option<f64>,
    #[serde(default)]
    percent_change_60d: Option<f64>,
    #[serde(default)]
    percent_change_90d: Option<f64>,
    #[serde(default)]
    date_added: Option<String>,
    #[serde(default)]
    circulating_supply: Option<f64>,
    #[serde(default)]
    total_supply: Option<f64>,
    #[serde(default)]
    max_365d_price: Option<f64>,
    #[serde(default)]
    max_365d_date: Option<String>,
    #[serde(default)]
    min_365d_price: Option<f64>,
    #[serde(default)]
    min_365d_date: Option<String>,
    #[serde(default, rename = "AI_text")]
    ai_text: Option<String>,
    #[serde(default, rename = "AI_invest")]
    ai_invest: Option<String>,
    #[serde(default)]
    gemini_invest: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
struct Portfolio {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct PortfoliosResponse {
    portfolios: Vec<Portfolio>,
}

#[derive(Deserialize)]
struct AddPortfolioResponse {
    success: bool,
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct UpdatePricesResponse {
    success: bool,
    #[serde(default)]
    updated_coins: u32,
}

#[derive(Deserialize)]
struct SavePurchasesResponse {
    success: bool,
    #[serde(default)]
    message: String,
}

#[derive(Clone, Debug, Deserialize)]
struct PerfPoint {
    date: String,
    value: f64,
    invested: f64,
}

#[derive(Deserialize)]
struct PerformanceResponse {
    performance: Vec<PerfPoint>,
}

#[derive(Clone, Debug, Deserialize)]
struct CompositionSlice {
    symbol: String,
    value: f64,
    #[serde(default)]
    percentage: f64,
}

#[derive(Deserialize)]
struct CompositionResponse {
    composition: Vec<CompositionSlice>,
}

/// Tracks clickable UI regions for mouse interaction
#[derive(Default, Clone)]
struct ClickableRegions {
    /// Sortable column headers: (rect, column index)
    header_cells: Vec<(Rect, usize)>,
    /// Category chips: (rect, chip index)
    chips: Vec<(Rect, usize)>,
    /// "All" / "None" chip buttons
    chip_buttons: Vec<(Rect, &'static str)>,
    /// Visible coin rows: (rect, index into CoinTable::rows)
    rows: Vec<(Rect, usize)>,
    /// Footer button regions: (rect, action name)
    footer_buttons: Vec<(Rect, &'static str)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortKind {
    Number,
    Percent,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    fn flip(self) -> Self {
        match self {
            SortDirection::Ascending => SortDirection::Descending,
            SortDirection::Descending => SortDirection::Ascending,
        }
    }
}

const COL_FAV: usize = 0;
const COL_RANK: usize = 1;
const COL_NAME: usize = 2;
const COL_PRICE: usize = 3;
const COL_VOLUME: usize = 4;
const COL_CHANGE: usize = 5;

const COLUMNS: &[(&str, u16, SortKind)] = &[
    ("Fav", 4, SortKind::Text),
    ("Rank", 6, SortKind::Number),
    ("Name", 26, SortKind::Text),
    ("Price", 12, SortKind::Number),
    ("Vol 24h", 10, SortKind::Number),
    ("24h %", 8, SortKind::Percent),
];

/// How a category-color entry matches a trend classification code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodeMatch {
    Exact(i64),
    Range(i64, i64),
}

impl CodeMatch {
    fn matches(self, code: i64) -> bool {
        match self {
            CodeMatch::Exact(n) => code == n,
            CodeMatch::Range(lo, hi) => (lo..=hi).contains(&code),
        }
    }
}

/// Static category-color table. Exact codes are checked before ranges;
/// within each pass the first matching entry in declaration order wins.
const CATEGORY_COLORS: &[(&str, CodeMatch, Color)] = &[
    ("Memes", CodeMatch::Exact(1), Color::Magenta),
    ("AI", CodeMatch::Exact(2), Color::Cyan),
    ("DeFi", CodeMatch::Exact(3), Color::Blue),
    ("Gaming", CodeMatch::Range(10, 19), Color::Green),
    ("Infrastructure", CodeMatch::Range(20, 29), Color::Yellow),
];

fn trend_color(code: i64) -> Option<Color> {
    for (_, m, color) in CATEGORY_COLORS {
        if matches!(m, CodeMatch::Exact(_)) && m.matches(code) {
            return Some(*color);
        }
    }
    for (_, m, color) in CATEGORY_COLORS {
        if matches!(m, CodeMatch::Range(_, _)) && m.matches(code) {
            return Some(*color);
        }
    }
    None
}

#[derive(Clone, Debug)]
struct CategoryChip {
    id: String,
    label: String,
    active: bool,
}

#[derive(Clone, Debug)]
struct CoinRow {
    coin_id: String,
    name: String,
    symbol: String,
    category_ids: Vec<String>,
    /// Category label list shown in the hover tooltip
    categories: String,
    trend_code: Option<i64>,
    favourite: bool,
    /// Rendered cell text, one entry per COLUMNS; also the sort keys
    cells: Vec<String>,
    visible: bool,
    color: Option<Color>,
}

impl CoinRow {
    fn from_token(t: &Token) -> Self {
        let cells = vec![
            if t.is_favourite { "★" } else { "☆" }.to_string(),
            t.cmc_rank.map(|r| r.to_string()).unwrap_or_else(|| "N/A".into()),
            format!("{} ({})", t.name, t.symbol.to_uppercase()),
            t.price_usd.map(format_price).unwrap_or_else(|| "N/A".into()),
            t.volume_24h.map(|v| format!("${}", format_number(v))).unwrap_or_else(|| "N/A".into()),
            t.percent_change_24h.map(|p| format!("{:+.2}%", p)).unwrap_or_else(|| "N/A".into()),
        ];
        CoinRow {
            coin_id: t.id.clone(),
            name: t.name.clone(),
            symbol: t.symbol.to_uppercase(),
            category_ids: t.category_ids.clone(),
            categories: t.categories.clone().unwrap_or_default(),
            trend_code: t.about_what,
            favourite: t.is_favourite,
            cells,
            visible: true,
            color: None,
        }
    }
}

/// Single shared hover tooltip
#[derive(Clone, Debug, Default)]
struct Tooltip {
    visible: bool,
    text: String,
    x: u16,
    y: u16,
    row: Option<usize>,
}

/// Headless table view controller: owns visibility, order and color of the
/// coin rows and recomputes them from scratch on every toggle.
struct CoinTable {
    rows: Vec<CoinRow>,
    chips: Vec<CategoryChip>,
    top_category_ids: HashSet<String>,
    active_categories: HashSet<String>,
    other_active: bool,
    hide_non_trended: bool,
    sort_column: Option<usize>,
    sort_kind: SortKind,
    sort_direction: SortDirection,
    visible_count: usize,
    tooltip: Tooltip,
}

impl CoinTable {
    fn new(rows: Vec<CoinRow>, chips: Vec<CategoryChip>) -> Self {
        let top_category_ids: HashSet<String> = chips
            .iter()
            .filter(|c| c.id != OTHER_CATEGORY_ID)
            .map(|c| c.id.clone())
            .collect();
        // Every category starts active
        let active_categories = top_category_ids.clone();
        let mut table = CoinTable {
            rows,
            chips,
            top_category_ids,
            active_categories,
            other_active: true,
            hide_non_trended: false,
            sort_column: None,
            sort_kind: SortKind::Text,
            sort_direction: SortDirection::Ascending,
            visible_count: 0,
            tooltip: Tooltip::default(),
        };
        table.color_trended_on_load();
        table.apply_filter();
        table
    }

    /// Swap in a fresh row set, keeping chip/sort/filter state
    fn replace_rows(&mut self, rows: Vec<CoinRow>) {
        self.rows = rows;
        self.color_trended_on_load();
        self.sort_rows();
        self.apply_filter();
    }

    /// A row belongs to Other when none of its categories is a chip category
    fn is_other(&self, row: &CoinRow) -> bool {
        !row.category_ids.iter().any(|id| self.top_category_ids.contains(id.trim()))
    }

    fn count_other(&self) -> usize {
        self.rows.iter().filter(|r| self.is_other(r)).count()
    }

    fn chip_count(&self, chip: &CategoryChip) -> usize {
        if chip.id == OTHER_CATEGORY_ID {
            self.count_other()
        } else {
            self.rows
                .iter()
                .filter(|r| r.category_ids.iter().any(|id| id.trim() == chip.id))
                .count()
        }
    }

    /// Recompute visibility for every row and return the visible count
    fn apply_filter(&mut self) -> usize {
        let decisions: Vec<bool> = self
            .rows
            .iter()
            .map(|row| {
                let category_pass = if self.is_other(row) {
                    self.other_active
                } else {
                    row.category_ids
                        .iter()
                        .any(|id| self.active_categories.contains(id.trim()))
                };
                let trend_pass = !self.hide_non_trended || row.trend_code.map_or(false, |c| c != 0);
                category_pass && trend_pass
            })
            .collect();
        let mut visible_count = 0;
        for (row, show) in self.rows.iter_mut().zip(decisions) {
            row.visible = show;
            if show {
                visible_count += 1;
            }
        }
        self.visible_count = visible_count;
        visible_count
    }

    fn toggle_chip_at(&mut self, idx: usize) {
        let Some(chip) = self.chips.get_mut(idx) else { return };
        chip.active = !chip.active;
        if chip.id == OTHER_CATEGORY_ID {
            self.other_active = chip.active;
        } else if chip.active {
            self.active_categories.insert(chip.id.clone());
        } else {
            self.active_categories.remove(&chip.id);
        }
        self.apply_filter();
    }

    fn select_all(&mut self) {
        for chip in &mut self.chips {
            chip.active = true;
        }
        self.active_categories = self.top_category_ids.clone();
        self.other_active = true;
        self.apply_filter();
    }

    fn deselect_all(&mut self) {
        for chip in &mut self.chips {
            chip.active = false;
        }
        self.active_categories.clear();
        self.other_active = false;
        self.apply_filter();
    }

    fn toggle_trended_only(&mut self) {
        self.hide_non_trended = !self.hide_non_trended;
        self.apply_filter();
    }

    /// Column-header click: same column flips direction, a new column
    /// resets to ascending.
    fn toggle_sort(&mut self, column: usize, kind: SortKind) {
        if self.sort_column == Some(column) {
            self.sort_direction = self.sort_direction.flip();
        } else {
            self.sort_column = Some(column);
            self.sort_direction = SortDirection::Ascending;
        }
        self.sort_kind = kind;
        self.sort_rows();
    }

    /// Stable sort of all rows by the text of the active sort column.
    /// Un-parseable numeric/percent keys sort as -inf so they rank lowest.
    fn sort_rows(&mut self) {
        let Some(col) = self.sort_column else { return };
        let kind = self.sort_kind;
        let dir = self.sort_direction;
        self.rows.sort_by(|a, b| {
            let x = a.cells.get(col).map(String::as_str).unwrap_or("");
            let y = b.cells.get(col).map(String::as_str).unwrap_or("");
            let cmp = match kind {
                SortKind::Number => parse_number(x).partial_cmp(&parse_number(y)).unwrap_or(Ordering::Equal),
                SortKind::Percent => parse_percent(x).partial_cmp(&parse_percent(y)).unwrap_or(Ordering::Equal),
                SortKind::Text => x.to_lowercase().cmp(&y.to_lowercase()),
            };
            match dir {
                SortDirection::Ascending => cmp,
                SortDirection::Descending => cmp.reverse(),
            }
        });
    }

    /// Color every row by its trend code via the category-color table
    fn color_trended_on_load(&mut self) {
        for row in &mut self.rows {
            row.color = row.trend_code.and_then(trend_color);
        }
    }

    /// Clear all colors, then color only the rows matching the named
    /// category entry. Repeated calls never leave stale colors behind.
    fn color_by_category(&mut self, label: &str) {
        for row in &mut self.rows {
            row.color = None;
        }
        let Some((_, m, color)) = CATEGORY_COLORS.iter().find(|(l, _, _)| *l == label) else {
            return;
        };
        for row in &mut self.rows {
            if row.trend_code.map_or(false, |c| m.matches(c)) {
                row.color = Some(*color);
            }
        }
    }

    fn update_trends(&mut self, trends: &[TrendUpdate]) {
        for t in trends {
            if let Some(row) = self.rows.iter_mut().find(|r| r.coin_id == t.coin_id) {
                row.trend_code = t.about_what;
            }
        }
    }

    fn set_favourite(&mut self, coin_id: &str, value: bool) {
        if let Some(row) = self.rows.iter_mut().find(|r| r.coin_id == coin_id) {
            row.favourite = value;
            row.cells[COL_FAV] = if value { "★" } else { "☆" }.to_string();
        }
    }

    /// Show the tooltip for a row near the pointer. A row with an empty
    /// category string is a silent no-op.
    fn show_tooltip(&mut self, row_idx: usize, x: u16, y: u16) {
        let Some(row) = self.rows.get(row_idx) else { return };
        if row.categories.trim().is_empty() {
            return;
        }
        self.tooltip.visible = true;
        self.tooltip.text = row.categories.clone();
        self.tooltip.x = x.saturating_add(TOOLTIP_OFFSET_X);
        self.tooltip.y = y.saturating_add(TOOLTIP_OFFSET_Y);
        self.tooltip.row = Some(row_idx);
    }

    fn move_tooltip(&mut self, x: u16, y: u16) {
        if !self.tooltip.visible {
            return;
        }
        self.tooltip.x = x.saturating_add(TOOLTIP_OFFSET_X);
        self.tooltip.y = y.saturating_add(TOOLTIP_OFFSET_Y);
    }

    fn hide_tooltip(&mut self) {
        self.tooltip.visible = false;
        self.tooltip.row = None;
    }
}

/// Build chips from the loaded coin set: the most common categories get a
/// chip, everything else falls under a synthetic Other chip.
fn build_chips(tokens: &[Token]) -> Vec<CategoryChip> {
    let mut counts: HashMap<&str, (usize, &str)> = HashMap::new();
    for t in tokens {
        let labels: Vec<&str> = t
            .categories
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .collect();
        for (i, id) in t.category_ids.iter().enumerate() {
            let id = id.trim();
            if id.is_empty() {
                continue;
            }
            let label = labels.get(i).copied().filter(|l| !l.is_empty()).unwrap_or(id);
            let entry = counts.entry(id).or_insert((0, label));
            entry.0 += 1;
        }
    }
    let mut ranked: Vec<(&str, usize, &str)> = counts.into_iter().map(|(id, (n, label))| (id, n, label)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    ranked.truncate(MAX_CATEGORY_CHIPS);
    let mut chips: Vec<CategoryChip> = ranked
        .into_iter()
        .map(|(id, _, label)| CategoryChip {
            id: id.to_string(),
            label: label.to_string(),
            active: true,
        })
        .collect();
    chips.push(CategoryChip {
        id: OTHER_CATEGORY_ID.to_string(),
        label: "Other".to_string(),
        active: true,
    });
    chips
}

/// Parse a rendered numeric cell ("$10.50", "$2.50B") dropping any
/// non-numeric characters; un-parseable input becomes -inf.
fn parse_number(s: &str) -> f64 {
    let cleaned: String = s.chars().filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-').collect();
    cleaned.parse().unwrap_or(f64::NEG_INFINITY)
}

/// Parse a percent cell ("+2.35%"); un-parseable input becomes -inf
fn parse_percent(s: &str) -> f64 {
    s.trim()
        .trim_end_matches('%')
        .trim_start_matches('+')
        .parse()
        .unwrap_or(f64::NEG_INFINITY)
}

fn format_price(price: f64) -> String {
    if price < 1.0 {
        format!("${:.4}", price)
    } else {
        format!("${:.2}", price)
    }
}

fn format_number(num: f64) -> String {
    if num > 1e9 {
        format!("{:.2}B", num / 1e9)
    } else if num > 1e6 {
        format!("{:.2}M", num / 1e6)
    } else if num > 1e3 {
        format!("{:.2}K", num / 1e3)
    } else {
        format!("{:.0}", num)
    }
}

/// Position of the current price inside the 365-day range, as 0..=100
fn price_range_position(min: f64, max: f64, current: f64) -> f64 {
    if max <= min {
        return 0.0;
    }
    (((current - min) / (max - min)) * 100.0).clamp(0.0, 100.0)
}

/// Render lightweight analytics markup ("### heading", "**bold**") into
/// styled lines for a Paragraph.
fn format_analytics(content: &str) -> Vec<Line<'static>> {
    let bold = Style::default().add_modifier(Modifier::BOLD);
    let heading = Style::default().add_modifier(Modifier::BOLD | Modifier::UNDERLINED);
    let mut out = Vec::new();
    for raw in content.lines() {
        let line = raw.trim_end();
        if let Some(h) = line.strip_prefix("###") {
            out.push(Line::from(Span::styled(h.trim().to_string(), heading)));
            continue;
        }
        let mut spans = Vec::new();
        let mut rest = line;
        let mut in_bold = false;
        while let Some(idx) = rest.find("**") {
            let (head, tail) = rest.split_at(idx);
            if !head.is_empty() {
                spans.push(if in_bold {
                    Span::styled(head.to_string(), bold)
                } else {
                    Span::raw(head.to_string())
                });
            }
            in_bold = !in_bold;
            rest = &tail[2..];
        }
        if !rest.is_empty() {
            spans.push(if in_bold {
                Span::styled(rest.to_string(), bold)
            } else {
                Span::raw(rest.to_string())
            });
        }
        out.push(Line::from(spans));
    }
    out
}

/// Blocking HTTP client for the dashboard backend, used from background
/// threads only.
#[derive(Clone)]
struct ApiClient {
    base: String,
    http: reqwest::blocking::Client,
}

impl ApiClient {
    fn from_env() -> Self {
        let base = std::env::var("CRYPTO_TUI_API")
            .ok()
            .or_else(Self::config_api_url)
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        ApiClient {
            base: base.trim_end_matches('/').to_string(),
            http: reqwest::blocking::Client::new(),
        }
    }

    fn config_api_url() -> Option<String> {
        let path = dirs::home_dir()?.join(".config/crypto-tui/api_url");
        let url = fs::read_to_string(path).ok()?;
        let url = url.trim();
        if url.is_empty() {
            None
        } else {
            Some(url.to_string())
        }
    }

    fn get_tokens(&self, search: &str) -> Result<Vec<Token>> {
        let resp: TokensResponse = self
            .http
            .get(format!("{}/get_all_tokens", self.base))
            .query(&[("search", search)])
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()?
            .error_for_status()?
            .json()?;
        Ok(resp.tokens)
    }

    fn toggle_favourite(&self, coin_id: &str, is_favourite: bool) -> Result<String> {
        let resp: ToggleFavouriteResponse = self
            .http
            .post(format!("{}/toggle_favourite", self.base))
            .json(&serde_json::json!({ "id": coin_id, "isFavourites": is_favourite }))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()?
            .error_for_status()?
            .json()?;
        if let Some(err) = resp.error {
            anyhow::bail!(err);
        }
        Ok(resp.action.unwrap_or_default())
    }

    fn add_to_favourites(&self, token_ids: &[String]) -> Result<String> {
        let resp: AddFavouritesResponse = self
            .http
            .post(format!("{}/add_to_favourites", self.base))
            .json(&serde_json::json!({ "token_ids": token_ids }))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()?
            .error_for_status()?
            .json()?;
        if !resp.success {
            anyhow::bail!("could not add tokens to favourites");
        }
        Ok(resp.message)
    }

    fn coin_details(&self, coin_id: &str) -> Result<CoinDetails> {
        let details: CoinDetails = self
            .http
            .get(format!("{}/coin_details/{}", self.base, coin_id))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()?
            .error_for_status()?
            .json()?;
        if let Some(err) = &details.error {
            anyhow::bail!(err.clone());
        }
        Ok(details)
    }

    fn trend_coins(&self, coin_ids: &[String]) -> Result<Vec<TrendUpdate>> {
        let resp: TrendsResponse = self
            .http
            .post(format!("{}/trend_coins", self.base))
            .json(&serde_json::json!({ "coin_ids": coin_ids }))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()?
            .error_for_status()?
            .json()?;
        Ok(resp.trends)
    }

    fn save_filters(&self, categories: &[String], other_active: bool, hide_non_trended: bool) -> Result<()> {
        self.http
            .post(format!("{}/save_filters", self.base))
            .json(&serde_json::json!({
                "categories": categories,
                "other_active": other_active,
                "hide_non_trended": hide_non_trended,
            }))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()?
            .error_for_status()?;
        Ok(())
    }

    fn update_prices(&self) -> Result<u32> {
        let resp: UpdatePricesResponse = self
            .http
            .post(format!("{}/update_prices", self.base))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()?
            .error_for_status()?
            .json()?;
        if !resp.success {
            anyhow::bail!("price update failed");
        }
        Ok(resp.updated_coins)
    }

    fn get_portfolios(&self) -> Result<Vec<Portfolio>> {
        let resp: PortfoliosResponse = self
            .http
            .get(format!("{}/get_portfolios", self.base))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()?
            .error_for_status()?
            .json()?;
        Ok(resp.portfolios)
    }

    fn add_portfolio(&self, name: &str, description: &str) -> Result<String> {
        let resp: AddPortfolioResponse = self
            .http
            .post(format!("{}/add_portfolio", self.base))
            .json(&serde_json::json!({ "name": name, "description": description }))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()?
            .error_for_status()?
            .json()?;
        if !resp.success {
            anyhow::bail!("could not add portfolio");
        }
        Ok(resp.name)
    }

    fn save_purchases(&self, portfolio_id: &str, purchases: &[PurchaseItem]) -> Result<String> {
        let resp: SavePurchasesResponse = self
            .http
            .post(format!("{}/save_purchases", self.base))
            .json(&serde_json::json!({ "portfolio_id": portfolio_id, "purchases": purchases }))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()?
            .error_for_status()?
            .json()?;
        if !resp.success {
            anyhow::bail!("could not save purchases");
        }
        Ok(resp.message)
    }

    fn portfolio_performance(&self, portfolio_id: &str, period: Period) -> Result<Vec<PerfPoint>> {
        let resp: PerformanceResponse = self
            .http
            .get(format!("{}/api/portfolio/{}/performance", self.base, portfolio_id))
            .query(&[("period", period.query())])
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()?
            .error_for_status()?
            .json()?;
        Ok(resp.performance)
    }

    fn portfolio_composition(&self, portfolio_id: &str) -> Result<Vec<CompositionSlice>> {
        let resp: CompositionResponse = self
            .http
            .get(format!("{}/api/portfolio/{}/composition", self.base, portfolio_id))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()?
            .error_for_status()?
            .json()?;
        Ok(resp.composition)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Period {
    D7,
    D30,
    D90,
    All,
}

impl Period {
    const ALL: [Period; 4] = [Period::D7, Period::D30, Period::D90, Period::All];

    fn query(self) -> &'static str {
        match self {
            Period::D7 => "7d",
            Period::D30 => "30d",
            Period::D90 => "90d",
            Period::All => "all",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Period::D7 => "7d",
            Period::D30 => "30d",
            Period::D90 => "90d",
            Period::All => "All",
        }
    }
}

/// One purchase line as sent to the backend
#[derive(Clone, Debug, Serialize)]
struct PurchaseItem {
    coin_id: String,
    coin_name: String,
    coin_symbol: String,
    quantity: f64,
    price_usd: f64,
    total_amount: f64,
    purchase_date: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PurchaseField {
    Quantity,
    Price,
}

/// Editable purchase line; quantity and price stay text until submit
#[derive(Clone, Debug)]
struct PurchaseRow {
    coin_id: String,
    name: String,
    symbol: String,
    quantity: String,
    price: String,
    date: String,
}

impl PurchaseRow {
    fn field_mut(&mut self, field: PurchaseField) -> &mut String {
        match field {
            PurchaseField::Quantity => &mut self.quantity,
            PurchaseField::Price => &mut self.price,
        }
    }

    fn amount(&self) -> f64 {
        field_value(&self.quantity) * field_value(&self.price)
    }
}

/// Lenient parse for user-edited fields; anything invalid counts as zero
fn field_value(s: &str) -> f64 {
    s.trim().parse().unwrap_or(0.0)
}

/// Rows with a zero quantity, price or total are dropped, not rejected
fn build_purchase_items(rows: &[PurchaseRow]) -> Vec<PurchaseItem> {
    rows.iter()
        .filter_map(|row| {
            let quantity = field_value(&row.quantity);
            let price = field_value(&row.price);
            let total = quantity * price;
            if quantity <= 0.0 || price <= 0.0 || total <= 0.0 {
                return None;
            }
            Some(PurchaseItem {
                coin_id: row.coin_id.clone(),
                coin_name: row.name.clone(),
                coin_symbol: row.symbol.clone(),
                quantity,
                price_usd: price,
                total_amount: total,
                purchase_date: row.date.clone(),
            })
        })
        .collect()
}

struct DetailState {
    name: String,
    symbol: String,
    details: Option<Box<CoinDetails>>,
    scroll: u16,
}

#[derive(Default)]
struct AddTokensState {
    query: String,
    results: Vec<Token>,
    cursor: usize,
    selected: Vec<Token>,
    /// Set on every keystroke; the search fires after a quiet period
    last_input: Option<Instant>,
    searching: bool,
}

struct PurchaseState {
    rows: Vec<PurchaseRow>,
    portfolios: Vec<Portfolio>,
    portfolio_idx: usize,
    focus_row: usize,
    focus_field: PurchaseField,
    /// Name being typed for a new portfolio, when the inline form is open
    creating: Option<String>,
    loading_portfolios: bool,
}

struct PortfolioDetail {
    portfolio: Portfolio,
    period: Period,
    performance: Vec<PerfPoint>,
    composition: Vec<CompositionSlice>,
    loading: bool,
}

struct PortfolioState {
    portfolios: Vec<Portfolio>,
    selected: usize,
    detail: Option<PortfolioDetail>,
    loading: bool,
}

enum InputMode {
    Normal,
    CoinDetail(DetailState),
    AddTokens(AddTokensState),
    Purchase(PurchaseState),
    Portfolio(PortfolioState),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NoticeKind {
    Success,
    Warning,
    Error,
}

struct Notification {
    message: String,
    kind: NoticeKind,
    shown_at: Instant,
}

struct App {
    api: ApiClient,
    demo: bool,
    table: CoinTable,
    table_state: TableState,
    input_mode: InputMode,
    notification: Option<Notification>,
    clickable: ClickableRegions,
    /// Coins marked for purchase: coin id to preset dollar amount
    marked: HashMap<String, u32>,
    /// In-flight favorite toggles: coin id to the pre-toggle value,
    /// restored if the request fails
    pending_favorites: HashMap<String, bool>,
    /// Index into CATEGORY_COLORS when single-category coloring is on
    color_label_idx: Option<usize>,
    fetch_tx: Sender<FetchMessage>,
    fetch_rx: Receiver<FetchMessage>,
    is_loading: bool,
    updated_at: Option<String>,
    /// Monotonic search request counter; responses tagged with an older
    /// value are discarded
    search_seq: u64,
    purchase_requested: bool,
    demo_portfolios: Vec<Portfolio>,
}

impl App {
    fn new() -> App {
        App::with_demo(is_demo_mode())
    }

    fn with_demo(demo: bool) -> App {
        let (fetch_tx, fetch_rx) = mpsc::channel();
        App {
            api: ApiClient::from_env(),
            demo,
            table: CoinTable::new(Vec::new(), Vec::new()),
            table_state: TableState::default(),
            input_mode: InputMode::Normal,
            notification: None,
            clickable: ClickableRegions::default(),
            marked: HashMap::new(),
            pending_favorites: HashMap::new(),
            color_label_idx: None,
            fetch_tx,
            fetch_rx,
            is_loading: false,
            updated_at: None,
            search_seq: 0,
            purchase_requested: false,
            demo_portfolios: vec![
                Portfolio { id: "demo-1".into(), name: "Main".into() },
                Portfolio { id: "demo-2".into(), name: "Trading".into() },
            ],
        }
    }

    fn notify(&mut self, message: impl Into<String>, kind: NoticeKind) {
        self.notification = Some(Notification {
            message: message.into(),
            kind,
            shown_at: Instant::now(),
        });
    }

    fn expire_notification(&mut self) {
        if let Some(n) = &self.notification {
            if n.shown_at.elapsed() >= Duration::from_secs(NOTIFICATION_SECS) {
                self.notification = None;
            }
        }
    }

    /// Indices into `table.rows` of the currently visible rows, in order
    fn visible_indices(&self) -> Vec<usize> {
        self.table
            .rows
            .iter()
            .enumerate()
            .filter(|(_, r)| r.visible)
            .map(|(i, _)| i)
            .collect()
    }

    fn visible_position(&self, rows_idx: usize) -> Option<usize> {
        self.visible_indices().iter().position(|&i| i == rows_idx)
    }

    fn selected_row(&self) -> Option<&CoinRow> {
        let vis = self.visible_indices();
        self.table_state
            .selected()
            .and_then(|pos| vis.get(pos))
            .map(|&i| &self.table.rows[i])
    }

    fn next_row(&mut self) {
        let len = self.table.visible_count;
        if len == 0 {
            return;
        }
        let i = match self.table_state.selected() {
            Some(i) => (i + 1) % len,
            None => 0,
        };
        self.table_state.select(Some(i));
    }

    fn prev_row(&mut self) {
        let len = self.table.visible_count;
        if len == 0 {
            return;
        }
        let i = match self.table_state.selected() {
            Some(i) => (i + len - 1) % len,
            None => 0,
        };
        self.table_state.select(Some(i));
    }

    fn select_row_by_index(&mut self, rows_idx: usize) {
        if let Some(pos) = self.visible_position(rows_idx) {
            self.table_state.select(Some(pos));
        }
    }

    /// Drain the fetch channel without blocking
    fn process_fetch_results(&mut self) {
        while let Ok(msg) = self.fetch_rx.try_recv() {
            match msg {
                FetchMessage::Coins(tokens) => {
                    let rows: Vec<CoinRow> = tokens.iter().map(CoinRow::from_token).collect();
                    if self.table.chips.is_empty() {
                        self.table = CoinTable::new(rows, build_chips(&tokens));
                    } else {
                        self.table.replace_rows(rows);
                    }
                    if self.table_state.selected().is_none() && self.table.visible_count > 0 {
                        self.table_state.select(Some(0));
                    }
                    self.is_loading = false;
                    self.updated_at = Some(Local::now().format("%H:%M:%S").to_string());
                }
                FetchMessage::Trends(trends) => {
                    self.table.update_trends(&trends);
                    match self.color_label_idx {
                        Some(i) => self.table.color_by_category(CATEGORY_COLORS[i].0),
                        None => self.table.color_trended_on_load(),
                    }
                    self.table.apply_filter();
                }
                FetchMessage::FavouriteToggled { coin_id, ok, message } => {
                    if ok {
                        self.pending_favorites.remove(&coin_id);
                        self.notify(message, NoticeKind::Success);
                    } else {
                        if let Some(prev) = self.pending_favorites.remove(&coin_id) {
                            self.table.set_favourite(&coin_id, prev);
                        }
                        self.notify(format!("Favorite change failed: {message}"), NoticeKind::Error);
                    }
                }
                FetchMessage::SearchResults { seq, tokens } => {
                    // Out-of-order response from an earlier keystroke. Compared
                    // against the last issued search, not the last applied one:
                    // a failed newer search must still shadow older responses.
                    if seq < self.search_seq {
                        continue;
                    }
                    if let InputMode::AddTokens(state) = &mut self.input_mode {
                        state.results = tokens;
                        state.cursor = 0;
                        state.searching = false;
                    }
                }
                FetchMessage::CoinDetails(details) => {
                    if let InputMode::CoinDetail(state) = &mut self.input_mode {
                        if !details.name.is_empty() {
                            state.name = details.name.clone();
                        }
                        if !details.symbol.is_empty() {
                            state.symbol = details.symbol.to_uppercase();
                        }
                        state.details = Some(details);
                    }
                }
                FetchMessage::Portfolios(portfolios) => match &mut self.input_mode {
                    InputMode::Purchase(state) => {
                        state.portfolios = portfolios;
                        state.portfolio_idx = 0;
                        state.loading_portfolios = false;
                    }
                    InputMode::Portfolio(state) => {
                        if state.selected >= portfolios.len() {
                            state.selected = portfolios.len().saturating_sub(1);
                        }
                        state.portfolios = portfolios;
                        state.loading = false;
                    }
                    _ => {}
                },
                FetchMessage::PortfolioCreated(name) => {
                    self.notify(format!("Portfolio \"{name}\" created"), NoticeKind::Success);
                    self.start_portfolios();
                }
                FetchMessage::PricesUpdated(count) => {
                    self.notify(format!("Prices updated for {count} coins"), NoticeKind::Success);
                    if self.purchase_requested {
                        self.purchase_requested = false;
                        self.open_purchase_modal();
                    }
                }
                FetchMessage::PurchasesSaved(message) => {
                    let message = if message.is_empty() { "Purchases saved".to_string() } else { message };
                    self.notify(message, NoticeKind::Success);
                    self.input_mode = InputMode::Normal;
                    self.marked.clear();
                }
                FetchMessage::FavouritesAdded(message) => {
                    let message = if message.is_empty() { "Tokens added to favourites".to_string() } else { message };
                    self.notify(message, NoticeKind::Success);
                    self.input_mode = InputMode::Normal;
                    self.start_load();
                }
                FetchMessage::Performance(points) => {
                    if let InputMode::Portfolio(state) = &mut self.input_mode {
                        if let Some(detail) = &mut state.detail {
                            detail.performance = points;
                            detail.loading = false;
                        }
                    }
                }
                FetchMessage::Composition(slices) => {
                    if let InputMode::Portfolio(state) = &mut self.input_mode {
                        if let Some(detail) = &mut state.detail {
                            detail.composition = slices;
                        }
                    }
                }
                FetchMessage::Error(message) => {
                    self.is_loading = false;
                    self.purchase_requested = false;
                    if let InputMode::AddTokens(state) = &mut self.input_mode {
                        state.searching = false;
                        state.last_input = None;
                    }
                    self.notify(message, NoticeKind::Error);
                }
            }
        }
    }

    fn start_load(&mut self) {
        self.is_loading = true;
        if self.demo {
            let _ = self.fetch_tx.send(FetchMessage::Coins(demo_tokens()));
            let _ = self.fetch_tx.send(FetchMessage::Trends(demo_trends()));
            return;
        }
        let api = self.api.clone();
        let tx = self.fetch_tx.clone();
        thread::spawn(move || match api.get_tokens("") {
            Ok(tokens) => {
                let ids: Vec<String> = tokens.iter().map(|t| t.id.clone()).collect();
                let _ = tx.send(FetchMessage::Coins(tokens));
                match api.trend_coins(&ids) {
                    Ok(trends) => {
                        let _ = tx.send(FetchMessage::Trends(trends));
                    }
                    Err(e) => {
                        let _ = tx.send(FetchMessage::Error(format!("Trend fetch failed: {e}")));
                    }
                }
            }
            Err(e) => {
                let _ = tx.send(FetchMessage::Error(format!("Coin fetch failed: {e}")));
            }
        });
    }

    /// Fire the debounced token search once the quiet period has elapsed
    fn fire_due_search(&mut self) {
        let mut query = None;
        if let InputMode::AddTokens(state) = &mut self.input_mode {
            if let Some(t) = state.last_input {
                if t.elapsed() >= Duration::from_millis(SEARCH_DEBOUNCE_MS) {
                    state.last_input = None;
                    let q = state.query.trim().to_string();
                    if q.chars().count() >= MIN_SEARCH_LEN {
                        query = Some(q);
                    } else {
                        state.results.clear();
                        state.cursor = 0;
                    }
                }
            }
        }
        if let Some(q) = query {
            self.start_search(q);
        }
    }

    fn start_search(&mut self, query: String) {
        self.search_seq += 1;
        let seq = self.search_seq;
        if let InputMode::AddTokens(state) = &mut self.input_mode {
            state.searching = true;
        }
        if self.demo {
            let q = query.to_lowercase();
            let tokens: Vec<Token> = demo_tokens()
                .into_iter()
                .filter(|t| t.name.to_lowercase().contains(&q) || t.symbol.to_lowercase().contains(&q))
                .collect();
            let _ = self.fetch_tx.send(FetchMessage::SearchResults { seq, tokens });
            return;
        }
        let api = self.api.clone();
        let tx = self.fetch_tx.clone();
        thread::spawn(move || {
            let msg = match api.get_tokens(&query) {
                Ok(tokens) => FetchMessage::SearchResults { seq, tokens },
                Err(e) => FetchMessage::Error(format!("Token search failed: {e}")),
            };
            let _ = tx.send(msg);
        });
    }

    /// Optimistic toggle: flip the row immediately, roll back on failure
    fn toggle_favorite(&mut self) {
        let Some(row) = self.selected_row() else { return };
        let coin_id = row.coin_id.clone();
        let prev = row.favourite;
        let next = !prev;
        self.pending_favorites.insert(coin_id.clone(), prev);
        self.table.set_favourite(&coin_id, next);
        if self.demo {
            let message = if next { "Added to favourites" } else { "Removed from favourites" };
            let _ = self.fetch_tx.send(FetchMessage::FavouriteToggled {
                coin_id,
                ok: true,
                message: message.to_string(),
            });
            return;
        }
        let api = self.api.clone();
        let tx = self.fetch_tx.clone();
        thread::spawn(move || {
            let msg = match api.toggle_favourite(&coin_id, next) {
                Ok(action) => FetchMessage::FavouriteToggled {
                    coin_id,
                    ok: true,
                    message: if action.is_empty() { "Favourites updated".to_string() } else { format!("Favourites: {action}") },
                },
                Err(e) => FetchMessage::FavouriteToggled { coin_id, ok: false, message: e.to_string() },
            };
            let _ = tx.send(msg);
        });
    }

    fn open_detail(&mut self) {
        let Some(row) = self.selected_row() else { return };
        let coin_id = row.coin_id.clone();
        let name = row.name.clone();
        let symbol = row.symbol.clone();
        let price = parse_number(&row.cells[COL_PRICE]);
        self.input_mode = InputMode::CoinDetail(DetailState {
            name: name.clone(),
            symbol: symbol.clone(),
            details: None,
            scroll: 0,
        });
        if self.demo {
            let _ = self
                .fetch_tx
                .send(FetchMessage::CoinDetails(Box::new(demo_details(&name, &symbol, price))));
            return;
        }
        let api = self.api.clone();
        let tx = self.fetch_tx.clone();
        thread::spawn(move || {
            let msg = match api.coin_details(&coin_id) {
                Ok(details) => FetchMessage::CoinDetails(Box::new(details)),
                Err(e) => FetchMessage::Error(format!("Coin details failed: {e}")),
            };
            let _ = tx.send(msg);
        });
    }

    /// Cycle single-category coloring through CATEGORY_COLORS and back to
    /// trend coloring.
    fn cycle_color(&mut self) {
        self.color_label_idx = match self.color_label_idx {
            None => Some(0),
            Some(i) if i + 1 < CATEGORY_COLORS.len() => Some(i + 1),
            Some(_) => None,
        };
        match self.color_label_idx {
            Some(i) => self.table.color_by_category(CATEGORY_COLORS[i].0),
            None => self.table.color_trended_on_load(),
        }
    }

    /// Cycle the purchase preset on the selected coin: off, $10 .. $500, off
    fn cycle_marked(&mut self) {
        let Some(row) = self.selected_row() else { return };
        let coin_id = row.coin_id.clone();
        let next = match self.marked.get(&coin_id) {
            None => Some(PURCHASE_PRESETS[0]),
            Some(&amount) => PURCHASE_PRESETS
                .iter()
                .position(|&p| p == amount)
                .and_then(|i| PURCHASE_PRESETS.get(i + 1))
                .copied(),
        };
        match next {
            Some(amount) => {
                self.marked.insert(coin_id, amount);
            }
            None => {
                self.marked.remove(&coin_id);
            }
        }
    }

    fn collect_marked(&self) -> Vec<PurchaseRow> {
        let mut rows = Vec::new();
        for row in &self.table.rows {
            if let Some(&amount) = self.marked.get(&row.coin_id) {
                let price = parse_number(&row.cells[COL_PRICE]);
                let valid = price.is_finite() && price > 0.0;
                let quantity = if valid { f64::from(amount) / price } else { 0.0 };
                rows.push(PurchaseRow {
                    coin_id: row.coin_id.clone(),
                    name: row.name.clone(),
                    symbol: row.symbol.clone(),
                    quantity: format!("{quantity:.8}"),
                    price: if valid { price.to_string() } else { String::new() },
                    date: Local::now().format("%Y-%m-%d %H:%M").to_string(),
                });
            }
        }
        rows
    }

    fn open_purchase_modal(&mut self) {
        let rows = self.collect_marked();
        self.input_mode = InputMode::Purchase(PurchaseState {
            rows,
            portfolios: Vec::new(),
            portfolio_idx: 0,
            focus_row: 0,
            focus_field: PurchaseField::Quantity,
            creating: None,
            loading_portfolios: true,
        });
        self.start_portfolios();
    }

    fn start_update_prices(&mut self) {
        if self.demo {
            let _ = self.fetch_tx.send(FetchMessage::PricesUpdated(self.marked.len() as u32));
            return;
        }
        let api = self.api.clone();
        let tx = self.fetch_tx.clone();
        thread::spawn(move || {
            let msg = match api.update_prices() {
                Ok(count) => FetchMessage::PricesUpdated(count),
                Err(e) => FetchMessage::Error(format!("Price update failed: {e}")),
            };
            let _ = tx.send(msg);
        });
    }

    fn start_portfolios(&mut self) {
        if self.demo {
            let _ = self.fetch_tx.send(FetchMessage::Portfolios(self.demo_portfolios.clone()));
            return;
        }
        let api = self.api.clone();
        let tx = self.fetch_tx.clone();
        thread::spawn(move || {
            let msg = match api.get_portfolios() {
                Ok(portfolios) => FetchMessage::Portfolios(portfolios),
                Err(e) => FetchMessage::Error(format!("Portfolio fetch failed: {e}")),
            };
            let _ = tx.send(msg);
        });
    }

    fn start_add_portfolio(&mut self, name: String) {
        if self.demo {
            let id = format!("demo-{}", self.demo_portfolios.len() + 1);
            self.demo_portfolios.push(Portfolio { id, name: name.clone() });
            let _ = self.fetch_tx.send(FetchMessage::PortfolioCreated(name));
            return;
        }
        let api = self.api.clone();
        let tx = self.fetch_tx.clone();
        thread::spawn(move || {
            let msg = match api.add_portfolio(&name, "") {
                Ok(created) => FetchMessage::PortfolioCreated(if created.is_empty() { name } else { created }),
                Err(e) => FetchMessage::Error(format!("Portfolio create failed: {e}")),
            };
            let _ = tx.send(msg);
        });
    }

    fn start_save_purchases(&mut self, portfolio_id: String, items: Vec<PurchaseItem>) {
        if self.demo {
            let _ = self
                .fetch_tx
                .send(FetchMessage::PurchasesSaved(format!("Saved {} purchases", items.len())));
            return;
        }
        let api = self.api.clone();
        let tx = self.fetch_tx.clone();
        thread::spawn(move || {
            let msg = match api.save_purchases(&portfolio_id, &items) {
                Ok(message) => FetchMessage::PurchasesSaved(message),
                Err(e) => FetchMessage::Error(format!("Saving purchases failed: {e}")),
            };
            let _ = tx.send(msg);
        });
    }

    fn start_add_favourites(&mut self, token_ids: Vec<String>) {
        if self.demo {
            let _ = self
                .fetch_tx
                .send(FetchMessage::FavouritesAdded(format!("Added {} tokens", token_ids.len())));
            return;
        }
        let api = self.api.clone();
        let tx = self.fetch_tx.clone();
        thread::spawn(move || {
            let msg = match api.add_to_favourites(&token_ids) {
                Ok(message) => FetchMessage::FavouritesAdded(message),
                Err(e) => FetchMessage::Error(format!("Adding favourites failed: {e}")),
            };
            let _ = tx.send(msg);
        });
    }

    fn start_performance(&mut self, portfolio_id: String, period: Period) {
        if self.demo {
            let _ = self.fetch_tx.send(FetchMessage::Performance(demo_performance(period)));
            return;
        }
        let api = self.api.clone();
        let tx = self.fetch_tx.clone();
        thread::spawn(move || {
            let msg = match api.portfolio_performance(&portfolio_id, period) {
                Ok(points) => FetchMessage::Performance(points),
                Err(e) => FetchMessage::Error(format!("Performance fetch failed: {e}")),
            };
            let _ = tx.send(msg);
        });
    }

    fn start_composition(&mut self, portfolio_id: String) {
        if self.demo {
            let _ = self.fetch_tx.send(FetchMessage::Composition(demo_composition()));
            return;
        }
        let api = self.api.clone();
        let tx = self.fetch_tx.clone();
        thread::spawn(move || {
            let msg = match api.portfolio_composition(&portfolio_id) {
                Ok(slices) => FetchMessage::Composition(slices),
                Err(e) => FetchMessage::Error(format!("Composition fetch failed: {e}")),
            };
            let _ = tx.send(msg);
        });
    }

    /// Fire-and-forget filter persistence; failures are not surfaced
    fn start_save_filters(&mut self) {
        if self.demo {
            return;
        }
        let api = self.api.clone();
        let mut categories: Vec<String> = self.table.active_categories.iter().cloned().collect();
        categories.sort();
        let other_active = self.table.other_active;
        let hide_non_trended = self.table.hide_non_trended;
        thread::spawn(move || {
            let _ = api.save_filters(&categories, other_active, hide_non_trended);
        });
    }

    fn save_favourites_from_modal(&mut self) {
        let ids: Vec<String> = match &self.input_mode {
            InputMode::AddTokens(state) => state.selected.iter().map(|t| t.id.clone()).collect(),
            _ => return,
        };
        if ids.is_empty() {
            self.notify("No tokens selected", NoticeKind::Warning);
            return;
        }
        self.start_add_favourites(ids);
    }

    fn save_purchases_from_modal(&mut self) {
        let (portfolio_id, items) = {
            let InputMode::Purchase(state) = &self.input_mode else { return };
            (
                state.portfolios.get(state.portfolio_idx).map(|p| p.id.clone()),
                build_purchase_items(&state.rows),
            )
        };
        let Some(portfolio_id) = portfolio_id else {
            self.notify("Create or pick a portfolio first", NoticeKind::Warning);
            return;
        };
        if items.is_empty() {
            self.notify("No valid purchase rows", NoticeKind::Warning);
            return;
        }
        self.start_save_purchases(portfolio_id, items);
    }

    fn open_portfolio_detail(&mut self) {
        let picked = {
            let InputMode::Portfolio(state) = &self.input_mode else { return };
            state.portfolios.get(state.selected).cloned()
        };
        let Some(portfolio) = picked else { return };
        let portfolio_id = portfolio.id.clone();
        if let InputMode::Portfolio(state) = &mut self.input_mode {
            state.detail = Some(PortfolioDetail {
                portfolio,
                period: Period::D7,
                performance: Vec::new(),
                composition: Vec::new(),
                loading: true,
            });
        }
        self.start_performance(portfolio_id.clone(), Period::D7);
        self.start_composition(portfolio_id);
    }

    fn set_portfolio_period(&mut self, period: Period) {
        let portfolio_id = {
            let InputMode::Portfolio(state) = &mut self.input_mode else { return };
            let Some(detail) = &mut state.detail else { return };
            if detail.period == period {
                return;
            }
            detail.period = period;
            detail.loading = true;
            detail.portfolio.id.clone()
        };
        self.start_performance(portfolio_id, period);
    }
}

fn is_demo_mode() -> bool {
    std::env::var("DEMO")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn demo_token(
    id: &str,
    name: &str,
    symbol: &str,
    rank: u32,
    price: f64,
    volume: f64,
    change: f64,
    cats: &[(&str, &str)],
    code: Option<i64>,
    fav: bool,
) -> Token {
    Token {
        id: id.to_string(),
        name: name.to_string(),
        symbol: symbol.to_string(),
        cmc_rank: Some(rank),
        price_usd: Some(price),
        volume_24h: Some(volume),
        percent_change_24h: Some(change),
        category_ids: cats.iter().map(|(i, _)| i.to_string()).collect(),
        categories: if cats.is_empty() {
            None
        } else {
            Some(cats.iter().map(|(_, l)| *l).collect::<Vec<_>>().join(", "))
        },
        about_what: code,
        is_favourite: fav,
    }
}

fn demo_tokens() -> Vec<Token> {
    let meme = ("cat-meme", "Memes");
    let ai = ("cat-ai", "AI");
    let defi = ("cat-defi", "DeFi");
    let gaming = ("cat-gaming", "Gaming");
    let infra = ("cat-infra", "Infrastructure");
    vec![
        demo_token("bitcoin", "Bitcoin", "btc", 1, 67241.12, 28_413_000_000.0, 1.24, &[infra], Some(21), true),
        demo_token("ethereum", "Ethereum", "eth", 2, 3412.55, 14_822_000_000.0, -0.83, &[infra, defi], Some(21), true),
        demo_token("dogecoin", "Dogecoin", "doge", 9, 0.1342, 812_000_000.0, 4.51, &[meme], Some(1), false),
        demo_token("shiba-inu", "Shiba Inu", "shib", 12, 0.000021, 402_000_000.0, 2.10, &[meme], Some(1), false),
        demo_token("pepe", "Pepe", "pepe", 24, 0.0000112, 644_000_000.0, 9.72, &[meme], Some(1), false),
        demo_token("fetch-ai", "Fetch.ai", "fet", 38, 1.62, 188_000_000.0, -2.44, &[ai], Some(2), false),
        demo_token("render", "Render", "rndr", 33, 7.85, 233_000_000.0, 3.06, &[ai, infra], Some(2), true),
        demo_token("uniswap", "Uniswap", "uni", 18, 9.41, 301_000_000.0, -1.15, &[defi], Some(3), false),
        demo_token("aave", "Aave", "aave", 41, 94.20, 152_000_000.0, 0.42, &[defi], Some(3), false),
        demo_token("immutable-x", "Immutable", "imx", 45, 1.88, 77_000_000.0, -3.31, &[gaming], Some(14), false),
        demo_token("axie-infinity", "Axie Infinity", "axs", 62, 6.12, 51_000_000.0, 1.77, &[gaming], Some(12), false),
        demo_token("monero", "Monero", "xmr", 29, 162.33, 94_000_000.0, 0.08, &[], None, false),
    ]
}

fn demo_trends() -> Vec<TrendUpdate> {
    vec![
        TrendUpdate { coin_id: "pepe".into(), about_what: Some(1) },
        TrendUpdate { coin_id: "fetch-ai".into(), about_what: Some(2) },
        TrendUpdate { coin_id: "monero".into(), about_what: Some(0) },
    ]
}

fn demo_details(name: &str, symbol: &str, price: f64) -> CoinDetails {
    let price = if price.is_finite() && price > 0.0 { price } else { 100.0 };
    CoinDetails {
        name: name.to_string(),
        symbol: symbol.to_string(),
        market_cap: Some(price * 19_000_000.0),
        market_cap_rank: Some(7),
        total_volume_usd: Some(price * 420_000.0),
        current_price_usd: Some(price),
        percent_change_1h: Some(0.21),
        price_change_percentage_24h: Some(1.24),
        percent_change_7d: Some(-3.40),
        percent_change_30d: Some(11.02),
        percent_change_60d: Some(18.77),
        percent_change_90d: Some(-6.13),
        date_added: Some("2013-04-28".to_string()),
        circulating_supply: Some(19_000_000.0),
        total_supply: Some(21_000_000.0),
        max_365d_price: Some(price * 1.35),
        max_365d_date: Some("2026-03-14".to_string()),
        min_365d_price: Some(price * 0.52),
        min_365d_date: Some("2025-09-02".to_string()),
        ai_text: Some(
            "### Overview\n**Strong** network activity with rising on-chain volume.\n\n### Risks\nShort-term volatility remains elevated around macro events.".to_string(),
        ),
        ai_invest: Some("### Signals\nAccumulation pattern on the 30d window, **neutral** momentum on 7d.".to_string()),
        gemini_invest: Some("Long-term holders keep absorbing supply; watch the 365d mid-range.".to_string()),
        error: None,
    }
}

fn demo_performance(period: Period) -> Vec<PerfPoint> {
    let days: u64 = match period {
        Period::D7 => 7,
        Period::D30 => 30,
        Period::D90 => 90,
        Period::All => 180,
    };
    let today = Local::now().date_naive();
    (0..days)
        .map(|i| {
            let date = today - Days::new(days - 1 - i);
            let drift = i as f64 * 9.0;
            let wave = (i as f64 * 0.7).sin() * 35.0;
            PerfPoint {
                date: date.format("%Y-%m-%d").to_string(),
                value: 1000.0 + drift + wave,
                invested: 900.0 + i as f64 * 6.0,
            }
        })
        .collect()
}

fn demo_composition() -> Vec<CompositionSlice> {
    vec![
        CompositionSlice { symbol: "BTC".into(), value: 812.40, percentage: 46.1 },
        CompositionSlice { symbol: "ETH".into(), value: 530.10, percentage: 30.1 },
        CompositionSlice { symbol: "RNDR".into(), value: 244.60, percentage: 13.9 },
        CompositionSlice { symbol: "DOGE".into(), value: 174.20, percentage: 9.9 },
    ]
}

fn main() -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new();
    app.start_load();
    let res = run_app(&mut terminal, &mut app);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("Error: {err:?}");
    }
    Ok(())
}

/// Actions that can be triggered by user input
enum Action {
    None,
    Quit,
    Refresh,
    Sort(usize),
    ToggleChipAt(usize),
    SelectAllChips,
    DeselectAllChips,
    ToggleTrendedOnly,
    ToggleFavorite,
    OpenDetail,
    OpenAddTokens,
    OpenPurchase,
    OpenPortfolios,
    CycleColor,
    MarkCycle,
    SelectRow(usize),
    Notify(String, NoticeKind),
    SaveFavourites,
    SavePurchases,
    CreatePortfolio(String),
    OpenPortfolioDetail,
    SetPortfolioPeriod(Period),
}

fn run_app(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, app: &mut App) -> Result<()> {
    loop {
        app.process_fetch_results();
        app.fire_due_search();
        app.expire_notification();
        terminal.draw(|f| ui(f, app))?;

        if !event::poll(Duration::from_millis(100))? {
            continue;
        }
        let action = match event::read()? {
            Event::Key(key) if key.kind == KeyEventKind::Press => handle_input(app, key.code),
            Event::Mouse(mouse) => handle_mouse(app, mouse),
            _ => Action::None,
        };
        match action {
            Action::None => {}
            Action::Quit => return Ok(()),
            Action::Refresh => app.start_load(),
            Action::Sort(col) => {
                let kind = COLUMNS[col].2;
                app.table.toggle_sort(col, kind);
            }
            Action::ToggleChipAt(idx) => {
                app.table.toggle_chip_at(idx);
                app.start_save_filters();
            }
            Action::SelectAllChips => {
                app.table.select_all();
                app.start_save_filters();
            }
            Action::DeselectAllChips => {
                app.table.deselect_all();
                app.start_save_filters();
            }
            Action::ToggleTrendedOnly => {
                app.table.toggle_trended_only();
                app.start_save_filters();
            }
            Action::ToggleFavorite => app.toggle_favorite(),
            Action::OpenDetail => app.open_detail(),
            Action::OpenAddTokens => app.input_mode = InputMode::AddTokens(AddTokensState::default()),
            Action::OpenPurchase => {
                if app.marked.is_empty() {
                    app.notify("No coins marked for purchase", NoticeKind::Warning);
                } else {
                    app.purchase_requested = true;
                    app.start_update_prices();
                }
            }
            Action::OpenPortfolios => {
                app.input_mode = InputMode::Portfolio(PortfolioState {
                    portfolios: Vec::new(),
                    selected: 0,
                    detail: None,
                    loading: true,
                });
                app.start_portfolios();
            }
            Action::CycleColor => app.cycle_color(),
            Action::MarkCycle => app.cycle_marked(),
            Action::SelectRow(idx) => app.select_row_by_index(idx),
            Action::Notify(message, kind) => app.notify(message, kind),
            Action::SaveFavourites => app.save_favourites_from_modal(),
            Action::SavePurchases => app.save_purchases_from_modal(),
            Action::CreatePortfolio(name) => {
                if name.trim().is_empty() {
                    app.notify("Portfolio name is empty", NoticeKind::Warning);
                } else {
                    if let InputMode::Purchase(state) = &mut app.input_mode {
                        state.creating = None;
                    }
                    app.start_add_portfolio(name.trim().to_string());
                }
            }
            Action::OpenPortfolioDetail => app.open_portfolio_detail(),
            Action::SetPortfolioPeriod(period) => app.set_portfolio_period(period),
        }
    }
}

fn handle_input(app: &mut App, key: KeyCode) -> Action {
    match &mut app.input_mode {
        InputMode::Normal => match key {
            KeyCode::Char('q') => Action::Quit,
            KeyCode::Down | KeyCode::Char('j') => {
                app.next_row();
                Action::None
            }
            KeyCode::Up | KeyCode::Char('k') => {
                app.prev_row();
                Action::None
            }
            KeyCode::Char('r') => Action::Refresh,
            KeyCode::Char('f') => Action::ToggleFavorite,
            KeyCode::Enter | KeyCode::Char('i') => Action::OpenDetail,
            KeyCode::Char('a') => Action::OpenAddTokens,
            KeyCode::Char('b') => Action::MarkCycle,
            KeyCode::Char('p') => Action::OpenPurchase,
            KeyCode::Char('v') => Action::OpenPortfolios,
            KeyCode::Char('c') => Action::CycleColor,
            KeyCode::Char('h') => Action::ToggleTrendedOnly,
            KeyCode::Char('o') => {
                let other = app.table.chips.iter().position(|c| c.id == OTHER_CATEGORY_ID);
                match other {
                    Some(idx) => Action::ToggleChipAt(idx),
                    None => Action::None,
                }
            }
            KeyCode::Char('s') => Action::SelectAllChips,
            KeyCode::Char('d') => Action::DeselectAllChips,
            KeyCode::Char(c @ '1'..='9') => Action::ToggleChipAt(c as usize - '1' as usize),
            KeyCode::F(n @ 1..=6) => Action::Sort(n as usize - 1),
            _ => Action::None,
        },
        InputMode::CoinDetail(state) => match key {
            KeyCode::Esc | KeyCode::Enter | KeyCode::Char('q') => {
                app.input_mode = InputMode::Normal;
                Action::None
            }
            KeyCode::Down | KeyCode::Char('j') => {
                state.scroll = state.scroll.saturating_add(1);
                Action::None
            }
            KeyCode::Up | KeyCode::Char('k') => {
                state.scroll = state.scroll.saturating_sub(1);
                Action::None
            }
            _ => Action::None,
        },
        InputMode::AddTokens(state) => match key {
            KeyCode::Esc => {
                app.input_mode = InputMode::Normal;
                Action::None
            }
            KeyCode::Down => {
                if !state.results.is_empty() {
                    state.cursor = (state.cursor + 1) % state.results.len();
                }
                Action::None
            }
            KeyCode::Up => {
                if !state.results.is_empty() {
                    state.cursor = (state.cursor + state.results.len() - 1) % state.results.len();
                }
                Action::None
            }
            KeyCode::Enter => {
                if !state.results.is_empty() {
                    let token = state.results[state.cursor.min(state.results.len() - 1)].clone();
                    if state.selected.iter().any(|t| t.id == token.id) {
                        Action::Notify(format!("{} is already selected", token.name), NoticeKind::Warning)
                    } else {
                        let name = token.name.clone();
                        state.selected.push(token);
                        state.query.clear();
                        state.results.clear();
                        state.cursor = 0;
                        state.last_input = None;
                        Action::Notify(format!("{name} selected"), NoticeKind::Success)
                    }
                } else if !state.selected.is_empty() {
                    Action::SaveFavourites
                } else {
                    Action::None
                }
            }
            KeyCode::Delete => {
                state.selected.pop();
                Action::None
            }
            KeyCode::Backspace => {
                state.query.pop();
                state.last_input = Some(Instant::now());
                Action::None
            }
            KeyCode::Char(c) => {
                state.query.push(c);
                state.last_input = Some(Instant::now());
                Action::None
            }
            _ => Action::None,
        },
        InputMode::Purchase(state) => {
            if let Some(name) = &mut state.creating {
                match key {
                    KeyCode::Esc => {
                        state.creating = None;
                        Action::None
                    }
                    KeyCode::Enter => Action::CreatePortfolio(name.clone()),
                    KeyCode::Backspace => {
                        name.pop();
                        Action::None
                    }
                    KeyCode::Char(c) => {
                        name.push(c);
                        Action::None
                    }
                    _ => Action::None,
                }
            } else {
                match key {
                    KeyCode::Esc => {
                        app.input_mode = InputMode::Normal;
                        Action::None
                    }
                    KeyCode::Enter => Action::SavePurchases,
                    KeyCode::Up => {
                        state.focus_row = state.focus_row.saturating_sub(1);
                        Action::None
                    }
                    KeyCode::Down => {
                        if state.focus_row + 1 < state.rows.len() {
                            state.focus_row += 1;
                        }
                        Action::None
                    }
                    KeyCode::Tab => {
                        state.focus_field = match state.focus_field {
                            PurchaseField::Quantity => PurchaseField::Price,
                            PurchaseField::Price => PurchaseField::Quantity,
                        };
                        Action::None
                    }
                    KeyCode::Left => {
                        state.portfolio_idx = state.portfolio_idx.saturating_sub(1);
                        Action::None
                    }
                    KeyCode::Right => {
                        if state.portfolio_idx + 1 < state.portfolios.len() {
                            state.portfolio_idx += 1;
                        }
                        Action::None
                    }
                    KeyCode::Char('n') => {
                        state.creating = Some(String::new());
                        Action::None
                    }
                    KeyCode::Backspace => {
                        if let Some(row) = state.rows.get_mut(state.focus_row) {
                            row.field_mut(state.focus_field).pop();
                        }
                        Action::None
                    }
                    KeyCode::Char(c) if c.is_ascii_digit() || c == '.' => {
                        if let Some(row) = state.rows.get_mut(state.focus_row) {
                            row.field_mut(state.focus_field).push(c);
                        }
                        Action::None
                    }
                    _ => Action::None,
                }
            }
        }
        InputMode::Portfolio(state) => match key {
            KeyCode::Esc | KeyCode::Char('q') => {
                if state.detail.is_some() {
                    state.detail = None;
                } else {
                    app.input_mode = InputMode::Normal;
                }
                Action::None
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if state.detail.is_none() && !state.portfolios.is_empty() {
                    state.selected = (state.selected + 1) % state.portfolios.len();
                }
                Action::None
            }
            KeyCode::Up | KeyCode::Char('k') => {
                if state.detail.is_none() && !state.portfolios.is_empty() {
                    state.selected = (state.selected + state.portfolios.len() - 1) % state.portfolios.len();
                }
                Action::None
            }
            KeyCode::Enter => {
                if state.detail.is_none() {
                    Action::OpenPortfolioDetail
                } else {
                    Action::None
                }
            }
            KeyCode::Char('1') => Action::SetPortfolioPeriod(Period::D7),
            KeyCode::Char('2') => Action::SetPortfolioPeriod(Period::D30),
            KeyCode::Char('3') => Action::SetPortfolioPeriod(Period::D90),
            KeyCode::Char('4') => Action::SetPortfolioPeriod(Period::All),
            _ => Action::None,
        },
    }
}

fn handle_mouse(app: &mut App, mouse: event::MouseEvent) -> Action {
    let (x, y) = (mouse.column, mouse.row);
    match &app.input_mode {
        InputMode::Normal => match mouse.kind {
            MouseEventKind::Moved => {
                let hit = app
                    .clickable
                    .rows
                    .iter()
                    .find(|(rect, _)| point_in_rect(x, y, *rect))
                    .map(|&(_, idx)| idx);
                match hit {
                    Some(idx) => {
                        if app.table.tooltip.row == Some(idx) {
                            app.table.move_tooltip(x, y);
                        } else {
                            app.table.hide_tooltip();
                            app.table.show_tooltip(idx, x, y);
                        }
                    }
                    None => app.table.hide_tooltip(),
                }
                Action::None
            }
            MouseEventKind::Down(MouseButton::Left) => {
                for (rect, col) in &app.clickable.header_cells {
                    if point_in_rect(x, y, *rect) {
                        return Action::Sort(*col);
                    }
                }
                for (rect, idx) in &app.clickable.chips {
                    if point_in_rect(x, y, *rect) {
                        return Action::ToggleChipAt(*idx);
                    }
                }
                for (rect, name) in &app.clickable.chip_buttons {
                    if point_in_rect(x, y, *rect) {
                        return match *name {
                            "all" => Action::SelectAllChips,
                            _ => Action::DeselectAllChips,
                        };
                    }
                }
                for (rect, idx) in &app.clickable.rows {
                    if point_in_rect(x, y, *rect) {
                        let pos = app.visible_position(*idx);
                        if pos.is_some() && pos == app.table_state.selected() {
                            return Action::OpenDetail;
                        }
                        return Action::SelectRow(*idx);
                    }
                }
                for (rect, name) in &app.clickable.footer_buttons {
                    if point_in_rect(x, y, *rect) {
                        return match *name {
                            "refresh" => Action::Refresh,
                            "quit" => Action::Quit,
                            _ => Action::None,
                        };
                    }
                }
                Action::None
            }
            _ => Action::None,
        },
        InputMode::CoinDetail(_) => {
            if matches!(mouse.kind, MouseEventKind::Down(MouseButton::Left)) {
                app.input_mode = InputMode::Normal;
            }
            Action::None
        }
        _ => Action::None,
    }
}

fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

fn ui(f: &mut Frame, app: &mut App) {
    // Regions are rebuilt every frame to stay in sync with the layout
    app.clickable = ClickableRegions::default();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(10),
            Constraint::Length(4),
            Constraint::Length(2),
        ])
        .split(f.area());

    render_chips(f, app, chunks[0]);
    render_coin_table(f, app, chunks[1]);
    render_status(f, app, chunks[2]);
    render_footer(f, app, chunks[3]);

    match &app.input_mode {
        InputMode::Normal => {}
        InputMode::CoinDetail(state) => render_detail_modal(f, state),
        InputMode::AddTokens(state) => render_add_tokens_modal(f, state),
        InputMode::Purchase(state) => render_purchase_modal(f, state),
        InputMode::Portfolio(state) => render_portfolio_modal(f, state),
    }

    if matches!(app.input_mode, InputMode::Normal) {
        render_tooltip(f, &app.table.tooltip);
    }
    render_notification(f, app);
}

fn render_chips(f: &mut Frame, app: &mut App, area: Rect) {
    let mut spans: Vec<Span> = Vec::new();
    let mut x = area.x + 1;
    let y = area.y + 1;
    for (i, chip) in app.table.chips.iter().enumerate() {
        let count = app.table.chip_count(chip);
        let text = format!(" {} {} ", chip.label, count);
        let width = text.chars().count() as u16;
        let style = if chip.active {
            if chip.id == OTHER_CATEGORY_ID {
                Style::default().fg(Color::Black).bg(Color::Magenta)
            } else {
                Style::default().fg(Color::Black).bg(Color::Cyan)
            }
        } else {
            Style::default().fg(Color::DarkGray)
        };
        app.clickable.chips.push((Rect::new(x, y, width, 1), i));
        spans.push(Span::styled(text, style));
        spans.push(Span::raw(" "));
        x += width + 1;
    }
    for (name, label) in [("all", "[All]"), ("none", "[None]")] {
        let width = label.chars().count() as u16;
        app.clickable.chip_buttons.push((Rect::new(x, y, width, 1), name));
        spans.push(Span::styled(label, Style::default().fg(Color::Yellow)));
        spans.push(Span::raw(" "));
        x += width + 1;
    }
    let para = Paragraph::new(Line::from(spans))
        .block(Block::default().borders(Borders::ALL).title(" Categories "));
    f.render_widget(para, area);
}

fn coin_to_row(row: &CoinRow, marked: Option<u32>) -> Row<'static> {
    let change_cell = &row.cells[COL_CHANGE];
    let change_color = if change_cell == "N/A" {
        Color::DarkGray
    } else if parse_percent(change_cell) >= 0.0 {
        Color::Green
    } else {
        Color::Red
    };
    let fav_style = if row.favourite {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    let mut name = row.cells[COL_NAME].clone();
    if let Some(amount) = marked {
        name.push_str(&format!("  [${amount}]"));
    }
    let cells = vec![
        Cell::from(row.cells[COL_FAV].clone()).style(fav_style),
        Cell::from(Line::from(row.cells[COL_RANK].clone()).alignment(Alignment::Right)),
        Cell::from(name),
        Cell::from(Line::from(row.cells[COL_PRICE].clone()).alignment(Alignment::Right)),
        Cell::from(Line::from(row.cells[COL_VOLUME].clone()).alignment(Alignment::Right)),
        Cell::from(Line::from(change_cell.clone()).alignment(Alignment::Right))
            .style(Style::default().fg(change_color)),
    ];
    let mut table_row = Row::new(cells);
    if let Some(bg) = row.color {
        table_row = table_row.style(Style::default().bg(bg));
    }
    table_row
}

fn render_coin_table(f: &mut Frame, app: &mut App, area: Rect) {
    let title = format!(" Coins ({}/{}) ", app.table.visible_count, app.table.rows.len());
    let block = Block::default().borders(Borders::ALL).title(title);

    if app.table.rows.is_empty() {
        let message = if app.is_loading { "Loading coins..." } else { "No coins loaded" };
        f.render_widget(Paragraph::new(message).block(block).alignment(Alignment::Center), area);
        return;
    }
    if app.table.visible_count == 0 {
        f.render_widget(
            Paragraph::new("No coins match the active filters")
                .block(block)
                .alignment(Alignment::Center)
                .style(Style::default().fg(Color::DarkGray)),
            area,
        );
        return;
    }

    let visible_idx = app.visible_indices();
    let mut x = area.x + 1;
    let header_y = area.y + 1;
    for (i, (_, width, _)) in COLUMNS.iter().enumerate() {
        app.clickable.header_cells.push((Rect::new(x, header_y, *width, 1), i));
        x += *width + 1;
    }
    let offset = app.table_state.offset();
    let first_row_y = area.y + 2;
    let max_y = area.y + area.height.saturating_sub(1);
    for (pos, &rows_i) in visible_idx.iter().enumerate() {
        if pos < offset {
            continue;
        }
        let row_y = first_row_y + (pos - offset) as u16;
        if row_y >= max_y {
            break;
        }
        app.clickable
            .rows
            .push((Rect::new(area.x + 1, row_y, area.width.saturating_sub(2), 1), rows_i));
    }

    let header_cells: Vec<Cell> = COLUMNS
        .iter()
        .enumerate()
        .map(|(i, (name, _, _))| {
            let arrow = if app.table.sort_column == Some(i) {
                match app.table.sort_direction {
                    SortDirection::Ascending => " ▲",
                    SortDirection::Descending => " ▼",
                }
            } else {
                ""
            };
            Cell::from(format!("{name}{arrow}")).style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
        })
        .collect();
    let header = Row::new(header_cells).height(1);
    let rows: Vec<Row> = visible_idx
        .iter()
        .map(|&i| {
            let row = &app.table.rows[i];
            coin_to_row(row, app.marked.get(&row.coin_id).copied())
        })
        .collect();
    let widths: Vec<Constraint> = COLUMNS.iter().map(|(_, w, _)| Constraint::Length(*w)).collect();
    let table = Table::new(rows, widths)
        .header(header)
        .block(block)
        .row_highlight_style(Style::default().bg(Color::DarkGray));
    f.render_stateful_widget(table, area, &mut app.table_state);
}

fn render_status(f: &mut Frame, app: &App, area: Rect) {
    let mut line1: Vec<Span> = vec![Span::raw(format!(
        "Updated: {}  |  Other: {}",
        app.updated_at.as_deref().unwrap_or("never"),
        app.table.count_other(),
    ))];
    if app.is_loading {
        line1.push(Span::styled("  Refreshing...", Style::default().fg(Color::Yellow)));
    }
    if app.table.hide_non_trended {
        line1.push(Span::styled("  [trended only]", Style::default().fg(Color::Magenta)));
    }

    let sort = match app.table.sort_column {
        Some(col) => {
            let arrow = match app.table.sort_direction {
                SortDirection::Ascending => "▲",
                SortDirection::Descending => "▼",
            };
            format!("{} {}", COLUMNS[col].0, arrow)
        }
        None => "none".to_string(),
    };
    let colors = match app.color_label_idx {
        Some(i) => CATEGORY_COLORS[i].0,
        None => "trend",
    };
    let marked_total: u32 = app.marked.values().sum();
    let line2 = format!(
        "Sort: {}  |  Colors: {}  |  Marked: {} (${})",
        sort,
        colors,
        app.marked.len(),
        marked_total,
    );

    let para = Paragraph::new(vec![Line::from(line1), Line::from(line2)])
        .block(Block::default().borders(Borders::ALL).title(" Status "));
    f.render_widget(para, area);
}

fn render_footer(f: &mut Frame, app: &mut App, area: Rect) {
    let line1 = " r=Refresh | q=Quit | jk=Move  Enter=Detail  f=Fav  a=Add  b=Mark  p=Buy  v=Portfolios";
    let line2 = " c=Color  h=Trended  o=Other  s=All  d=None  1-9=Chips  F1-F6=Sort";
    if let Some(pos) = line1.find("r=Refresh") {
        app.clickable
            .footer_buttons
            .push((Rect::new(area.x + pos as u16, area.y, 9, 1), "refresh"));
    }
    if let Some(pos) = line1.find("q=Quit") {
        app.clickable
            .footer_buttons
            .push((Rect::new(area.x + pos as u16, area.y, 6, 1), "quit"));
    }
    let para = Paragraph::new(vec![
        Line::from(line1).dark_gray(),
        Line::from(line2).dark_gray(),
    ]);
    f.render_widget(para, area);
}

fn render_tooltip(f: &mut Frame, tooltip: &Tooltip) {
    if !tooltip.visible || tooltip.text.is_empty() {
        return;
    }
    let area = f.area();
    let width = (tooltip.text.chars().count() as u16 + 2).min(area.width.saturating_sub(2)).max(3);
    let x = tooltip.x.min(area.width.saturating_sub(width));
    let y = tooltip.y.min(area.height.saturating_sub(3));
    let rect = Rect::new(x, y, width, 3);
    f.render_widget(Clear, rect);
    let para = Paragraph::new(tooltip.text.clone())
        .block(Block::default().borders(Borders::ALL))
        .style(Style::default().fg(Color::White).bg(Color::DarkGray));
    f.render_widget(para, rect);
}

fn render_notification(f: &mut Frame, app: &App) {
    let Some(n) = &app.notification else { return };
    let area = f.area();
    let width = (n.message.chars().count() as u16 + 4).min(area.width.saturating_sub(4));
    let rect = Rect::new(area.width.saturating_sub(width + 1), 1, width, 3);
    let color = match n.kind {
        NoticeKind::Success => Color::Green,
        NoticeKind::Warning => Color::Yellow,
        NoticeKind::Error => Color::Red,
    };
    f.render_widget(Clear, rect);
    let para = Paragraph::new(n.message.clone())
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(color)))
        .style(Style::default().fg(color));
    f.render_widget(para, rect);
}

fn pct_spans(label: &str, value: Option<f64>) -> Vec<Span<'static>> {
    let text = value.map(|v| format!("{v:+.2}%")).unwrap_or_else(|| "N/A".to_string());
    let color = match value {
        Some(v) if v >= 0.0 => Color::Green,
        Some(_) => Color::Red,
        None => Color::DarkGray,
    };
    vec![
        Span::raw(format!("{label}: ")),
        Span::styled(text, Style::default().fg(color)),
        Span::raw("   "),
    ]
}

fn opt_money(value: Option<f64>) -> String {
    value.map(|v| format!("${}", format_number(v))).unwrap_or_else(|| "N/A".to_string())
}

fn detail_lines(d: &CoinDetails, width: u16) -> Vec<Line<'static>> {
    let heading = Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD);
    let mut lines = Vec::new();

    let rank = d.market_cap_rank.map(|r| format!(" (#{r})")).unwrap_or_default();
    lines.push(Line::from(format!(
        "Price: {}    Market Cap: {}{}    Volume 24h: {}",
        d.current_price_usd.map(format_price).unwrap_or_else(|| "N/A".to_string()),
        opt_money(d.market_cap),
        rank,
        opt_money(d.total_volume_usd),
    )));
    lines.push(Line::from(format!(
        "Launched: {}    Supply: {} / {}",
        d.date_added.as_deref().unwrap_or("N/A"),
        d.circulating_supply.map(format_number).unwrap_or_else(|| "N/A".to_string()),
        d.total_supply.map(format_number).unwrap_or_else(|| "N/A".to_string()),
    )));
    lines.push(Line::default());

    if let (Some(min), Some(max)) = (d.min_365d_price, d.max_365d_price) {
        lines.push(Line::from(Span::styled("365-Day Range".to_string(), heading)));
        lines.push(Line::from(format!(
            "{} ({})  ..  {} ({})",
            format_price(min),
            d.min_365d_date.as_deref().unwrap_or("N/A"),
            format_price(max),
            d.max_365d_date.as_deref().unwrap_or("N/A"),
        )));
        let slider_w = 40usize.min(width.saturating_sub(4) as usize).max(10);
        let position = price_range_position(min, max, d.current_price_usd.unwrap_or(min));
        let marker = ((position / 100.0) * (slider_w - 1) as f64).round() as usize;
        let bar: String = (0..slider_w).map(|i| if i == marker { '●' } else { '─' }).collect();
        lines.push(Line::from(Span::styled(bar, Style::default().fg(Color::Cyan))));
        lines.push(Line::default());
    }

    let mut changes: Vec<Span> = Vec::new();
    changes.extend(pct_spans("1h", d.percent_change_1h));
    changes.extend(pct_spans("24h", d.price_change_percentage_24h));
    changes.extend(pct_spans("7d", d.percent_change_7d));
    changes.extend(pct_spans("30d", d.percent_change_30d));
    changes.extend(pct_spans("60d", d.percent_change_60d));
    changes.extend(pct_spans("90d", d.percent_change_90d));
    lines.push(Line::from(changes));
    lines.push(Line::default());

    for (title, text) in [
        ("AI Analytics", &d.ai_text),
        ("Investment Analysis", &d.ai_invest),
        ("Additional Analysis", &d.gemini_invest),
    ] {
        if let Some(text) = text {
            if text.trim().is_empty() {
                continue;
            }
            lines.push(Line::from(Span::styled(title.to_string(), heading)));
            lines.extend(format_analytics(text));
            lines.push(Line::default());
        }
    }
    lines
}

fn render_detail_modal(f: &mut Frame, state: &DetailState) {
    let area = centered_rect(80, 80, f.area());
    f.render_widget(Clear, area);
    let block = Block::default()
        .borders(Borders::ALL)
        .title(format!(" {} ({}) ", state.name, state.symbol))
        .border_style(Style::default().fg(Color::Cyan));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let Some(details) = &state.details else {
        f.render_widget(
            Paragraph::new("Loading details...").alignment(Alignment::Center),
            inner,
        );
        return;
    };
    let para = Paragraph::new(detail_lines(details, inner.width))
        .wrap(Wrap { trim: false })
        .scroll((state.scroll, 0));
    f.render_widget(para, inner);
}

fn render_add_tokens_modal(f: &mut Frame, state: &AddTokensState) {
    let area = centered_rect(60, 70, f.area());
    f.render_widget(Clear, area);
    let block = Block::default()
        .borders(Borders::ALL)
        .title(" Add Tokens ")
        .border_style(Style::default().fg(Color::Cyan));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let mut lines = vec![Line::from(vec![
        Span::raw("Search: "),
        Span::styled(format!("{}█", state.query), Style::default().fg(Color::Yellow)),
    ])];
    if state.searching {
        lines.push(Line::from("Searching...").dark_gray());
    }
    lines.push(Line::default());
    for (i, token) in state.results.iter().take(10).enumerate() {
        let marker = if i == state.cursor { "> " } else { "  " };
        let rank = token.cmc_rank.map(|r| format!("#{r}")).unwrap_or_else(|| "N/A".to_string());
        let price = token.price_usd.map(format_price).unwrap_or_else(|| "N/A".to_string());
        let text = format!("{marker}{} ({})  {rank}  {price}", token.name, token.symbol.to_uppercase());
        let style = if i == state.cursor {
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        };
        lines.push(Line::from(Span::styled(text, style)));
    }
    lines.push(Line::default());
    lines.push(Line::from(format!("Selected ({}):", state.selected.len())).cyan());
    for token in &state.selected {
        lines.push(Line::from(format!("  • {} ({})", token.name, token.symbol.to_uppercase())));
    }
    lines.push(Line::default());
    lines.push(Line::from("Type to search  ↑↓ pick  Enter add/save  Del unpick  Esc close").dark_gray());

    f.render_widget(Paragraph::new(lines).wrap(Wrap { trim: false }), inner);
}

fn render_purchase_modal(f: &mut Frame, state: &PurchaseState) {
    let area = centered_rect(80, 70, f.area());
    f.render_widget(Clear, area);
    let block = Block::default()
        .borders(Borders::ALL)
        .title(" Simulate Purchase ")
        .border_style(Style::default().fg(Color::Cyan));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let mut lines = Vec::new();
    let mut portfolio_spans: Vec<Span> = vec![Span::raw("Portfolio: ")];
    if state.loading_portfolios {
        portfolio_spans.push(Span::styled("loading...", Style::default().fg(Color::DarkGray)));
    } else if state.portfolios.is_empty() {
        portfolio_spans.push(Span::styled("none (press n to create)", Style::default().fg(Color::Yellow)));
    } else {
        for (i, p) in state.portfolios.iter().enumerate() {
            let style = if i == state.portfolio_idx {
                Style::default().fg(Color::Black).bg(Color::Cyan)
            } else {
                Style::default().fg(Color::DarkGray)
            };
            portfolio_spans.push(Span::styled(format!(" {} ", p.name), style));
            portfolio_spans.push(Span::raw(" "));
        }
    }
    lines.push(Line::from(portfolio_spans));
    if let Some(name) = &state.creating {
        lines.push(Line::from(vec![
            Span::raw("New portfolio name: "),
            Span::styled(format!("{name}█"), Style::default().fg(Color::Yellow)),
        ]));
    }
    lines.push(Line::default());
    lines.push(Line::from(format!(
        "  {:<22} {:>14} {:>12} {:>12}",
        "Coin", "Quantity", "Price", "Amount"
    )).cyan().bold());
    let mut total = 0.0;
    for (i, row) in state.rows.iter().enumerate() {
        let focused = i == state.focus_row && state.creating.is_none();
        let marker = if focused { "> " } else { "  " };
        let quantity = if focused && state.focus_field == PurchaseField::Quantity {
            format!("{}█", row.quantity)
        } else {
            row.quantity.clone()
        };
        let price = if focused && state.focus_field == PurchaseField::Price {
            format!("{}█", row.price)
        } else {
            row.price.clone()
        };
        let amount = row.amount();
        total += amount;
        let text = format!(
            "{marker}{:<22} {:>14} {:>12} {:>12}",
            format!("{} ({})", row.name, row.symbol),
            quantity,
            price,
            format!("${amount:.2}"),
        );
        let style = if focused {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default()
        };
        lines.push(Line::from(Span::styled(text, style)));
    }
    lines.push(Line::default());
    lines.push(Line::from(format!("Total: ${total:.2}")).bold());
    lines.push(Line::default());
    lines.push(Line::from("↑↓ row  Tab qty/price  ←→ portfolio  n=new portfolio  Enter save  Esc cancel").dark_gray());

    f.render_widget(Paragraph::new(lines).wrap(Wrap { trim: false }), inner);
}

fn render_portfolio_modal(f: &mut Frame, state: &PortfolioState) {
    let area = centered_rect(80, 80, f.area());
    f.render_widget(Clear, area);
    let block = Block::default()
        .borders(Borders::ALL)
        .title(" Portfolios ")
        .border_style(Style::default().fg(Color::Cyan));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let Some(detail) = &state.detail else {
        let mut lines = Vec::new();
        if state.loading {
            lines.push(Line::from("Loading portfolios...").dark_gray());
        } else if state.portfolios.is_empty() {
            lines.push(Line::from("No portfolios yet").dark_gray());
        }
        for (i, p) in state.portfolios.iter().enumerate() {
            let marker = if i == state.selected { "> " } else { "  " };
            let style = if i == state.selected {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            lines.push(Line::from(Span::styled(format!("{marker}{}", p.name), style)));
        }
        lines.push(Line::default());
        lines.push(Line::from("jk move  Enter open  Esc close").dark_gray());
        f.render_widget(Paragraph::new(lines), inner);
        return;
    };

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(8),
            Constraint::Length(7),
            Constraint::Length(1),
        ])
        .split(inner);

    let mut header: Vec<Span> = vec![Span::styled(
        format!("{}  ", detail.portfolio.name),
        Style::default().add_modifier(Modifier::BOLD),
    )];
    for period in Period::ALL {
        let style = if period == detail.period {
            Style::default().fg(Color::Black).bg(Color::Cyan)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        header.push(Span::styled(format!(" {} ", period.label()), style));
        header.push(Span::raw(" "));
    }
    f.render_widget(Paragraph::new(Line::from(header)), chunks[0]);

    if detail.performance.len() >= 2 {
        let value_data: Vec<(f64, f64)> = detail
            .performance
            .iter()
            .enumerate()
            .map(|(i, p)| (i as f64, p.value))
            .collect();
        let invested_data: Vec<(f64, f64)> = detail
            .performance
            .iter()
            .enumerate()
            .map(|(i, p)| (i as f64, p.invested))
            .collect();
        let mut y_min = f64::MAX;
        let mut y_max = f64::MIN;
        for p in &detail.performance {
            y_min = y_min.min(p.value).min(p.invested);
            y_max = y_max.max(p.value).max(p.invested);
        }
        let y_lo = y_min * 0.98;
        let y_hi = y_max * 1.02;
        let x_hi = (detail.performance.len() - 1) as f64;
        let first_date = detail.performance.first().map(|p| p.date.clone()).unwrap_or_default();
        let last_date = detail.performance.last().map(|p| p.date.clone()).unwrap_or_default();
        let datasets = vec![
            Dataset::default()
                .name("value")
                .marker(symbols::Marker::Braille)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(Color::Cyan))
                .data(&value_data),
            Dataset::default()
                .name("invested")
                .marker(symbols::Marker::Braille)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(Color::DarkGray))
                .data(&invested_data),
        ];
        let chart = Chart::new(datasets)
            .block(Block::default().borders(Borders::ALL).title(" Performance "))
            .x_axis(
                Axis::default()
                    .bounds([0.0, x_hi])
                    .labels(vec![Span::raw(first_date), Span::raw(last_date)]),
            )
            .y_axis(
                Axis::default()
                    .bounds([y_lo, y_hi])
                    .labels(vec![Span::raw(format!("{y_lo:.0}")), Span::raw(format!("{y_hi:.0}"))]),
            );
        f.render_widget(chart, chunks[1]);
    } else {
        let message = if detail.loading { "Loading performance..." } else { "Not enough data for a chart" };
        f.render_widget(
            Paragraph::new(message)
                .block(Block::default().borders(Borders::ALL).title(" Performance "))
                .alignment(Alignment::Center),
            chunks[1],
        );
    }

    let total: f64 = detail.composition.iter().map(|s| s.value).sum();
    let mut comp_lines = Vec::new();
    for slice in detail.composition.iter().take(5) {
        let pct = if slice.percentage > 0.0 {
            slice.percentage
        } else if total > 0.0 {
            slice.value / total * 100.0
        } else {
            0.0
        };
        let filled = ((pct / 100.0) * 16.0).round() as usize;
        let bar: String = (0..16).map(|i| if i < filled { '█' } else { '░' }).collect();
        comp_lines.push(Line::from(vec![
            Span::raw(format!("{:<6} {:>10}  ", slice.symbol, format!("${:.2}", slice.value))),
            Span::styled(bar, Style::default().fg(Color::Cyan)),
            Span::raw(format!(" {pct:.1}%")),
        ]));
    }
    f.render_widget(
        Paragraph::new(comp_lines).block(Block::default().borders(Borders::ALL).title(" Composition ")),
        chunks[2],
    );
    f.render_widget(
        Paragraph::new("1-4 period  Esc back").style(Style::default().fg(Color::DarkGray)),
        chunks[3],
    );
}

/// Helper function to create a centered rect using up certain percentage of the available rect
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(name: &str, price: &str, change: &str) -> Vec<String> {
        vec![
            "☆".to_string(),
            "1".to_string(),
            name.to_string(),
            price.to_string(),
            "$1.00M".to_string(),
            change.to_string(),
        ]
    }

    fn row(id: &str, cats: &[&str], code: Option<i64>) -> CoinRow {
        CoinRow {
            coin_id: id.to_string(),
            name: id.to_string(),
            symbol: id.to_uppercase(),
            category_ids: cats.iter().map(|s| s.to_string()).collect(),
            categories: cats.join(", "),
            trend_code: code,
            favourite: false,
            cells: cells(id, "$1.00", "+1.00%"),
            visible: true,
            color: None,
        }
    }

    fn priced(id: &str, price: &str) -> CoinRow {
        let mut r = row(id, &[], None);
        r.cells[COL_PRICE] = price.to_string();
        r
    }

    fn chips(ids: &[&str]) -> Vec<CategoryChip> {
        let mut v: Vec<CategoryChip> = ids
            .iter()
            .map(|id| CategoryChip { id: id.to_string(), label: id.to_string(), active: true })
            .collect();
        v.push(CategoryChip {
            id: OTHER_CATEGORY_ID.to_string(),
            label: "Other".to_string(),
            active: true,
        });
        v
    }

    fn visible(table: &CoinTable, id: &str) -> bool {
        table.rows.iter().find(|r| r.coin_id == id).unwrap().visible
    }

    fn chip_idx(table: &CoinTable, id: &str) -> usize {
        table.chips.iter().position(|c| c.id == id).unwrap()
    }

    #[test]
    fn uncategorized_rows_follow_other_toggle() {
        let rows = vec![row("a", &["1", "2"], None), row("b", &[], None), row("c", &["9"], None)];
        let mut table = CoinTable::new(rows, chips(&["1", "2"]));
        assert_eq!(table.visible_count, 3);

        let i1 = chip_idx(&table, "1");
        table.toggle_chip_at(i1);
        let i2 = chip_idx(&table, "2");
        table.toggle_chip_at(i2);

        assert_eq!(table.visible_count, 2);
        assert!(!visible(&table, "a"));
        assert!(visible(&table, "b"));
        assert!(visible(&table, "c"));

        let other = chip_idx(&table, OTHER_CATEGORY_ID);
        table.toggle_chip_at(other);
        assert_eq!(table.visible_count, 0);
    }

    #[test]
    fn row_with_any_active_category_stays_visible() {
        let rows = vec![row("a", &["1", "2"], None)];
        let mut table = CoinTable::new(rows, chips(&["1", "2"]));
        let i1 = chip_idx(&table, "1");
        table.toggle_chip_at(i1);
        assert!(visible(&table, "a"));
        let i2 = chip_idx(&table, "2");
        table.toggle_chip_at(i2);
        assert!(!visible(&table, "a"));
    }

    #[test]
    fn select_and_deselect_all_chips() {
        let rows = vec![row("a", &["1"], None), row("b", &[], None)];
        let mut table = CoinTable::new(rows, chips(&["1"]));
        table.deselect_all();
        assert_eq!(table.visible_count, 0);
        assert!(table.chips.iter().all(|c| !c.active));
        table.select_all();
        assert_eq!(table.visible_count, 2);
        assert!(table.chips.iter().all(|c| c.active));
    }

    #[test]
    fn count_other_ignores_chip_categories() {
        let rows = vec![row("a", &["1"], None), row("b", &[], None), row("c", &["zz"], None)];
        let table = CoinTable::new(rows, chips(&["1"]));
        assert_eq!(table.count_other(), 2);
    }

    #[test]
    fn number_sort_ranks_unparseable_lowest() {
        let rows = vec![priced("a", "$10.50"), priced("b", "abc"), priced("c", "$2")];
        let mut table = CoinTable::new(rows, chips(&[]));
        table.toggle_sort(COL_PRICE, SortKind::Number);
        let order: Vec<&str> = table.rows.iter().map(|r| r.coin_id.as_str()).collect();
        assert_eq!(order, ["b", "c", "a"]);
    }

    #[test]
    fn repeated_sort_reverses_order() {
        let rows = vec![priced("a", "$10.50"), priced("b", "abc"), priced("c", "$2")];
        let mut table = CoinTable::new(rows, chips(&[]));
        table.toggle_sort(COL_PRICE, SortKind::Number);
        table.toggle_sort(COL_PRICE, SortKind::Number);
        assert_eq!(table.sort_direction, SortDirection::Descending);
        let order: Vec<&str> = table.rows.iter().map(|r| r.coin_id.as_str()).collect();
        assert_eq!(order, ["a", "c", "b"]);
    }

    #[test]
    fn new_sort_column_resets_to_ascending() {
        let rows = vec![priced("a", "$10.50"), priced("c", "$2")];
        let mut table = CoinTable::new(rows, chips(&[]));
        table.toggle_sort(COL_PRICE, SortKind::Number);
        table.toggle_sort(COL_PRICE, SortKind::Number);
        assert_eq!(table.sort_direction, SortDirection::Descending);
        table.toggle_sort(COL_NAME, SortKind::Text);
        assert_eq!(table.sort_column, Some(COL_NAME));
        assert_eq!(table.sort_direction, SortDirection::Ascending);
    }

    #[test]
    fn text_sort_is_case_insensitive() {
        let mut a = row("a", &[], None);
        a.cells[COL_NAME] = "banana".to_string();
        let mut b = row("b", &[], None);
        b.cells[COL_NAME] = "Apple".to_string();
        let mut table = CoinTable::new(vec![a, b], chips(&[]));
        table.toggle_sort(COL_NAME, SortKind::Text);
        assert_eq!(table.rows[0].coin_id, "b");
    }

    #[test]
    fn trend_color_checks_exact_codes_before_ranges() {
        assert_eq!(trend_color(1), Some(Color::Magenta));
        assert_eq!(trend_color(2), Some(Color::Cyan));
        assert_eq!(trend_color(14), Some(Color::Green));
        assert_eq!(trend_color(25), Some(Color::Yellow));
        assert_eq!(trend_color(99), None);
    }

    #[test]
    fn load_coloring_maps_trend_codes() {
        let rows = vec![row("a", &[], Some(1)), row("b", &[], Some(12)), row("c", &[], None)];
        let table = CoinTable::new(rows, chips(&[]));
        assert_eq!(table.rows[0].color, Some(Color::Magenta));
        assert_eq!(table.rows[1].color, Some(Color::Green));
        assert_eq!(table.rows[2].color, None);
    }

    #[test]
    fn category_coloring_clears_previous_category() {
        let rows = vec![row("a", &[], Some(1)), row("b", &[], Some(2))];
        let mut table = CoinTable::new(rows, chips(&[]));
        table.color_by_category("Memes");
        assert_eq!(table.rows[0].color, Some(Color::Magenta));
        assert_eq!(table.rows[1].color, None);
        table.color_by_category("AI");
        assert_eq!(table.rows[0].color, None);
        assert_eq!(table.rows[1].color, Some(Color::Cyan));
        table.color_by_category("nope");
        assert!(table.rows.iter().all(|r| r.color.is_none()));
    }

    #[test]
    fn tooltip_skips_rows_without_categories() {
        let rows = vec![row("a", &[], None), row("b", &["meme"], None)];
        let mut table = CoinTable::new(rows, chips(&[]));
        table.show_tooltip(0, 5, 5);
        assert!(!table.tooltip.visible);

        table.show_tooltip(1, 5, 5);
        assert!(table.tooltip.visible);
        assert_eq!(table.tooltip.text, "meme");
        assert_eq!(table.tooltip.x, 5 + TOOLTIP_OFFSET_X);
        assert_eq!(table.tooltip.y, 5 + TOOLTIP_OFFSET_Y);

        table.move_tooltip(10, 10);
        assert_eq!(table.tooltip.x, 10 + TOOLTIP_OFFSET_X);

        table.hide_tooltip();
        assert!(!table.tooltip.visible);
        table.move_tooltip(20, 20);
        assert!(!table.tooltip.visible);
    }

    #[test]
    fn trended_only_hides_unclassified_rows() {
        let rows = vec![row("a", &["1"], Some(1)), row("b", &["1"], Some(0)), row("c", &["1"], None)];
        let mut table = CoinTable::new(rows, chips(&["1"]));
        table.toggle_trended_only();
        assert_eq!(table.visible_count, 1);
        assert!(visible(&table, "a"));
        table.toggle_trended_only();
        assert_eq!(table.visible_count, 3);
    }

    #[test]
    fn numeric_parsing_strips_formatting() {
        assert_eq!(parse_number("$10.50"), 10.50);
        assert_eq!(parse_number("$2.50B"), 2.50);
        assert_eq!(parse_number("abc"), f64::NEG_INFINITY);
        assert_eq!(parse_number("N/A"), f64::NEG_INFINITY);
        assert_eq!(parse_percent("+5.25%"), 5.25);
        assert_eq!(parse_percent("-0.80%"), -0.80);
        assert_eq!(parse_percent("N/A"), f64::NEG_INFINITY);
    }

    #[test]
    fn display_formatting() {
        assert_eq!(format_price(0.1234), "$0.1234");
        assert_eq!(format_price(1234.5), "$1234.50");
        assert_eq!(format_number(2_500_000_000.0), "2.50B");
        assert_eq!(format_number(1_500_000.0), "1.50M");
        assert_eq!(format_number(1234.0), "1.23K");
        assert_eq!(format_number(999.0), "999");
    }

    #[test]
    fn range_position_is_clamped() {
        assert_eq!(price_range_position(1.0, 10.0, 20.0), 100.0);
        assert_eq!(price_range_position(1.0, 10.0, 0.0), 0.0);
        assert_eq!(price_range_position(5.0, 5.0, 7.0), 0.0);
        assert_eq!(price_range_position(0.0, 10.0, 5.0), 50.0);
    }

    #[test]
    fn analytics_markup_becomes_styled_lines() {
        let lines = format_analytics("### Outlook\nplain **bold** tail");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].spans[0].content, "Outlook");
        assert!(lines[0].spans[0].style.add_modifier.contains(Modifier::UNDERLINED));
        let spans = &lines[1].spans;
        assert_eq!(spans[0].content, "plain ");
        assert_eq!(spans[1].content, "bold");
        assert!(spans[1].style.add_modifier.contains(Modifier::BOLD));
        assert_eq!(spans[2].content, " tail");
    }

    #[test]
    fn chips_derived_from_tokens_include_other() {
        let chips = build_chips(&demo_tokens());
        assert!(chips.iter().any(|c| c.id == OTHER_CATEGORY_ID));
        assert!(chips.iter().any(|c| c.label == "Memes"));
        assert!(chips.iter().all(|c| c.active));
        assert!(chips.len() <= MAX_CATEGORY_CHIPS + 1);
    }

    #[test]
    fn stale_search_results_are_discarded() {
        let mut app = App::with_demo(true);
        app.input_mode = InputMode::AddTokens(AddTokensState::default());
        app.search_seq = 2;
        let newest = vec![demo_tokens().remove(0)];
        app.fetch_tx
            .send(FetchMessage::SearchResults { seq: 2, tokens: newest })
            .unwrap();
        app.fetch_tx
            .send(FetchMessage::SearchResults { seq: 1, tokens: Vec::new() })
            .unwrap();
        app.process_fetch_results();

        let InputMode::AddTokens(state) = &app.input_mode else {
            panic!("expected add-tokens mode")
        };
        assert_eq!(state.results.len(), 1);
    }

    #[test]
    fn late_response_from_a_superseded_search_is_ignored() {
        let mut app = App::with_demo(true);
        app.input_mode = InputMode::AddTokens(AddTokensState {
            searching: true,
            ..AddTokensState::default()
        });
        app.search_seq = 2;
        // The newest search fails, then the older response trickles in
        app.fetch_tx
            .send(FetchMessage::Error("search failed".to_string()))
            .unwrap();
        app.fetch_tx
            .send(FetchMessage::SearchResults { seq: 1, tokens: vec![demo_tokens().remove(0)] })
            .unwrap();
        app.process_fetch_results();

        let InputMode::AddTokens(state) = &app.input_mode else {
            panic!("expected add-tokens mode")
        };
        assert!(state.results.is_empty());
        assert!(!state.searching);
    }

    #[test]
    fn failed_favourite_toggle_rolls_back() {
        let mut app = App::with_demo(true);
        app.start_load();
        app.process_fetch_results();

        let coin_id = app.table.rows[0].coin_id.clone();
        let prev = app.table.rows[0].favourite;
        app.pending_favorites.insert(coin_id.clone(), prev);
        app.table.set_favourite(&coin_id, !prev);

        app.fetch_tx
            .send(FetchMessage::FavouriteToggled {
                coin_id: coin_id.clone(),
                ok: false,
                message: "backend unavailable".to_string(),
            })
            .unwrap();
        app.process_fetch_results();

        let row = app.table.rows.iter().find(|r| r.coin_id == coin_id).unwrap();
        assert_eq!(row.favourite, prev);
        assert!(app.pending_favorites.is_empty());
        assert_eq!(app.notification.unwrap().kind, NoticeKind::Error);
    }

    #[test]
    fn marked_coins_become_purchase_rows() {
        let mut app = App::with_demo(true);
        app.start_load();
        app.process_fetch_results();
        app.marked.insert("bitcoin".to_string(), 100);

        let rows = app.collect_marked();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].coin_id, "bitcoin");
        let amount = field_value(&rows[0].quantity) * field_value(&rows[0].price);
        assert!((amount - 100.0).abs() < 0.01);
    }

    #[test]
    fn purchase_items_drop_invalid_rows() {
        let line = |quantity: &str, price: &str| PurchaseRow {
            coin_id: "a".to_string(),
            name: "A".to_string(),
            symbol: "A".to_string(),
            quantity: quantity.to_string(),
            price: price.to_string(),
            date: "2026-08-29 12:00".to_string(),
        };
        let items = build_purchase_items(&[line("2", "5"), line("", "5"), line("3", "0"), line("x", "5")]);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, 2.0);
        assert_eq!(items[0].price_usd, 5.0);
        assert_eq!(items[0].total_amount, 10.0);
    }

    #[test]
    fn purchase_preset_cycles_and_clears() {
        let mut app = App::with_demo(true);
        app.start_load();
        app.process_fetch_results();
        app.table_state.select(Some(0));

        let coin_id = app.selected_row().unwrap().coin_id.clone();
        for expected in PURCHASE_PRESETS {
            app.cycle_marked();
            assert_eq!(app.marked.get(&coin_id), Some(expected));
        }
        app.cycle_marked();
        assert!(app.marked.is_empty());
    }

    #[test]
    fn replacing_rows_keeps_filter_state() {
        let rows = vec![row("a", &["1"], None), row("b", &[], None)];
        let mut table = CoinTable::new(rows, chips(&["1"]));
        let other = chip_idx(&table, OTHER_CATEGORY_ID);
        table.toggle_chip_at(other);
        assert_eq!(table.visible_count, 1);

        table.replace_rows(vec![row("a", &["1"], None), row("b", &[], None), row("c", &[], None)]);
        assert_eq!(table.visible_count, 1);
        assert!(visible(&table, "a"));
        assert!(!visible(&table, "c"));
    }
}
