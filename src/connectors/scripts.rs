//! 快速路径使用的页面脚本
//!
//! 全部写成立即执行的表达式，返回可以直接按值传回的 JSON。
//! 读取 `__INITIAL_STATE__` 的脚本先在页面里 `JSON.stringify`，避开响应式代理对象。

/// 小红书笔记详情：`note.noteDetailMap`
pub const XHS_NOTE_DETAIL: &str = r#"
(() => {
    const state = window.__INITIAL_STATE__;
    if (state && state.note && state.note.noteDetailMap) {
        return JSON.stringify(state.note.noteDetailMap);
    }
    return "";
})()
"#;

/// 小红书创作者主页笔记列表：`user.notes`（二维数组）
pub const XHS_USER_NOTES: &str = r#"
(() => {
    const state = window.__INITIAL_STATE__;
    if (state && state.user && state.user.notes) {
        return JSON.stringify(state.user.notes);
    }
    return "";
})()
"#;

/// 小红书登录标记
pub const XHS_LOGIN_MARKER: &str =
    r#"!!document.querySelector('.main-container .user .link-wrapper .channel')"#;

/// 小红书搜索结果，`filter_user_id` 非空时只保留该作者的笔记
pub fn xhs_search_feeds(filter_user_id: Option<&str>) -> String {
    let filter = serde_json::to_string(&filter_user_id).unwrap_or_else(|_| "null".to_string());
    format!(
        r#"
(() => {{
    const filterId = {filter};
    const state = window.__INITIAL_STATE__;
    const feeds = state && state.search && state.search.feeds
        ? (state.search.feeds.value || state.search.feeds._value || [])
        : null;
    if (!feeds) {{
        return "";
    }}
    const kept = feeds.filter(feed => feed.noteCard
        && (!filterId || (feed.noteCard.user && feed.noteCard.user.userId === filterId)));
    return JSON.stringify(kept);
}})()
"#
    )
}

/// 微信公众号文章
pub const WECHAT_ARTICLE: &str = r#"
(() => {
    const text = el => el ? el.innerText.trim() : '';
    const title = text(document.querySelector('#activity-name, .rich_media_title, h1'));
    const author = text(document.querySelector('#js_name, #profileBt, .rich_media_meta_text'));

    let publishTime = text(document.querySelector('#publish_time'));
    const timeMatch = publishTime.match(/(\d{4}-\d{2}-\d{2}|\d{4}年\d{1,2}月\d{1,2}日)/);
    if (timeMatch) {
        publishTime = timeMatch[1];
    }

    const contentEl = document.querySelector('#js_content, .rich_media_content');
    const content = text(contentEl);
    const images = contentEl
        ? Array.from(contentEl.querySelectorAll('img'))
            .map(img => img.getAttribute('data-src') || img.getAttribute('src') || '')
            .filter(src => src && !src.startsWith('data:'))
            .map(src => src.startsWith('//') ? 'https:' + src : src)
        : [];

    return {
        title: title,
        author: author,
        publish_time: publishTime,
        content: content,
        summary: content.length > 200 ? content.substring(0, 200) + '...' : content,
        images: images,
        content_length: content.length,
        url: window.location.href
    };
})()
"#;

/// 任意网页
pub const GENERIC_PAGE: &str = r#"
(() => {
    const title = document.title || (document.querySelector('h1') || {}).innerText || '';
    const meta = name => {
        const el = document.querySelector(`meta[name="${name}"]`);
        return el ? (el.getAttribute('content') || '') : '';
    };

    let content = '';
    for (const selector of ['main', 'article', '[role="main"]', '.content', '.main-content', '#content', '.post-content', '.article-content']) {
        const el = document.querySelector(selector);
        if (el) {
            content = el.innerText.trim();
            if (content.length > 100) break;
        }
    }
    if (content.length < 100) {
        content = (document.body ? document.body.innerText : '').trim();
    }

    const links = Array.from(document.querySelectorAll('a[href]'))
        .map(a => ({ url: a.href, text: a.innerText.trim().substring(0, 100) }))
        .filter(l => l.text && !l.url.startsWith('javascript:'));
    const images = Array.from(document.querySelectorAll('img[src]'))
        .map(img => ({ url: img.src, alt: img.getAttribute('alt') || '' }))
        .filter(i => !i.url.startsWith('data:'));

    return {
        title: title,
        description: meta('description'),
        keywords: meta('keywords'),
        content: content,
        summary: content.length > 300 ? content.substring(0, 300) + '...' : content,
        content_length: content.length,
        links: links.slice(0, 20),
        link_count: links.length,
        images: images.slice(0, 20),
        image_count: images.length,
        url: window.location.href
    };
})()
"#;
